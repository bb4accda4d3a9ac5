//! Container engine adapter (`docker` CLI by default).
//!
//! Every call is a typed [`CommandSpec`]; the engine's exit status is the only
//! contract the rest of the crate relies on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::io::config::ContainerConfig;
use crate::io::process::{CommandSpec, ProcessRunner, run_checked};

/// Build request for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    pub tag: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    /// `KEY=value` pairs passed as `--build-arg`.
    pub build_args: Vec<(String, String)>,
}

pub struct ContainerEngine {
    runner: Arc<dyn ProcessRunner>,
    cfg: ContainerConfig,
    workdir: PathBuf,
}

impl ContainerEngine {
    pub fn new(runner: Arc<dyn ProcessRunner>, cfg: ContainerConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            cfg,
            workdir: workdir.into(),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.cfg
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.cfg.engine).current_dir(&self.workdir)
    }

    /// Check the engine is reachable. Safe to repeat.
    #[instrument(skip_all)]
    pub fn init(&self) -> Result<()> {
        run_checked(self.runner.as_ref(), &self.command().args(["info", "--format", "{{.ServerVersion}}"]))
            .context("container engine is not available")?;
        Ok(())
    }

    /// Log in to the configured registry, reading the password from stdin.
    #[instrument(skip_all, fields(registry = %self.cfg.registry))]
    pub fn login(&self, username: &str, password: &str) -> Result<()> {
        let spec = self
            .command()
            .args(["login", self.cfg.registry.as_str(), "--username", username, "--password-stdin"])
            .stdin(password.as_bytes().to_vec());
        run_checked(self.runner.as_ref(), &spec).context("registry login")?;
        info!("logged in to registry");
        Ok(())
    }

    /// Kill every running container carrying the transient label.
    ///
    /// Returns the number of containers killed.
    #[instrument(skip_all, fields(label = %self.cfg.transient_label))]
    pub fn kill_transient(&self) -> Result<usize> {
        let filter = format!("label={}", self.cfg.transient_label);
        let listing = run_checked(
            self.runner.as_ref(),
            &self.command().args(["ps", "--quiet", "--filter", filter.as_str()]),
        )
        .context("list transient containers")?;
        let ids: Vec<String> = listing
            .stdout_lossy()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            debug!("no transient containers running");
            return Ok(0);
        }
        run_checked(self.runner.as_ref(), &self.command().arg("kill").args(ids.iter().cloned()))
            .context("kill transient containers")?;
        info!(count = ids.len(), "killed transient containers");
        Ok(ids.len())
    }

    #[instrument(skip_all, fields(tag = %build.tag))]
    pub fn build(&self, build: &ImageBuild) -> Result<()> {
        let mut spec = self
            .command()
            .args(["build", "--tag", build.tag.as_str()]);
        for (key, value) in &build.build_args {
            spec = spec.arg("--build-arg").arg(format!("{key}={value}"));
        }
        spec = spec
            .arg("--file")
            .arg(path_arg(&build.dockerfile))
            .arg(path_arg(&build.context));
        run_checked(self.runner.as_ref(), &spec)?;
        Ok(())
    }

    /// Run an image to completion in a disposable, labelled container.
    #[instrument(skip_all, fields(image = image))]
    pub fn run_disposable(&self, image: &str) -> Result<()> {
        let spec = self
            .command()
            .args(["run", "--rm", "--label", self.cfg.transient_label.as_str(), image]);
        run_checked(self.runner.as_ref(), &spec)?;
        Ok(())
    }

    pub fn tag(&self, source: &str, target: &str) -> Result<()> {
        run_checked(self.runner.as_ref(), &self.command().args(["tag", source, target]))?;
        Ok(())
    }

    pub fn push(&self, image: &str) -> Result<()> {
        run_checked(self.runner.as_ref(), &self.command().args(["push", image]))?;
        Ok(())
    }

    /// `<image>:<version>`.
    pub fn local_image(&self, version: &str) -> String {
        format!("{}:{version}", self.cfg.image)
    }

    /// `<registry>/<image>:<version>`.
    pub fn remote_image(&self, version: &str) -> String {
        format!("{}/{}:{version}", self.cfg.registry, self.cfg.image)
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Split a composite `K=v K2=v2` build-argument string into pairs.
///
/// Entries without `=` are ignored.
pub fn parse_build_args(composite: &str) -> Vec<(String, String)> {
    composite
        .split_whitespace()
        .filter_map(|item| item.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
