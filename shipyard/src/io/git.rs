//! Git adapter for release tagging.
//!
//! Only annotated release tags are created; everything else about the
//! repository is left alone.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::io::process::{CommandSpec, ProcessRunner, run_checked};

/// Wrapper for executing git commands in a working directory.
pub struct Git {
    runner: Arc<dyn ProcessRunner>,
    workdir: PathBuf,
    remote: String,
}

impl Git {
    pub fn new(runner: Arc<dyn ProcessRunner>, workdir: impl Into<PathBuf>, remote: &str) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            remote: remote.to_string(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("git").current_dir(&self.workdir)
    }

    /// Create the annotated tag `v<version>` at HEAD and push it.
    ///
    /// Returns the tag name.
    #[instrument(skip_all, fields(version = %version))]
    pub fn tag_release(&self, version: &str) -> Result<String> {
        let tag = release_tag(version)?;
        let message = format!("Release {version}");
        run_checked(
            self.runner.as_ref(),
            &self
                .command()
                .args(["tag", "--annotate", tag.as_str(), "--message", message.as_str()]),
        )
        .with_context(|| format!("create tag {tag}"))?;
        debug!(tag = %tag, "tag created");

        run_checked(
            self.runner.as_ref(),
            &self.command().args(["push", self.remote.as_str(), tag.as_str()]),
        )
        .with_context(|| format!("push tag {tag} to {}", self.remote))?;
        info!(tag = %tag, remote = %self.remote, "release tagged");
        Ok(tag)
    }
}

/// Tag name for a release version.
pub fn release_tag(version: &str) -> Result<String> {
    let version = version.trim();
    if version.is_empty() || version.chars().any(char::is_whitespace) {
        bail!("invalid release version {version:?}");
    }
    Ok(format!("v{}", version.trim_start_matches('v')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    #[test]
    fn tag_release_creates_then_pushes() {
        let runner = Arc::new(ScriptedRunner::new());
        let git = Git::new(runner.clone(), "/work", "origin");
        let tag = git.tag_release("1.4.7").expect("tag");
        assert_eq!(tag, "v1.4.7");
        assert_eq!(
            runner.rendered(),
            vec![
                "git tag --annotate v1.4.7 --message 'Release 1.4.7'".to_string(),
                "git push origin v1.4.7".to_string(),
            ]
        );
    }

    #[test]
    fn failed_tag_is_not_pushed() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_when(|spec| spec.has_args_prefix(&["tag"]), "fatal: tag 'v1.0' already exists");
        let git = Git::new(runner.clone(), "/work", "origin");
        let err = git.tag_release("1.0").unwrap_err();
        assert!(format!("{err:#}").contains("already exists"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn release_tag_rejects_blank_versions() {
        assert!(release_tag("  ").is_err());
        assert!(release_tag("1 2").is_err());
        assert_eq!(release_tag("v2.0.0").expect("tag"), "v2.0.0");
    }
}
