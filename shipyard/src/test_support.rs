//! Test-only helpers: a scripted process runner and a scratch project root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::core::env::FinalizedEnvironment;
use crate::io::environment::{Overrides, RunKind, finalize};
use crate::io::config::ShipyardConfig;
use crate::io::process::{CommandSpec, ProcessOutput, ProcessRunner};

type Matcher = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

struct Rule {
    matches: Matcher,
    output: ProcessOutput,
}

/// Process runner that records every command and replays scripted outcomes.
///
/// Commands matching no rule succeed with empty output. The first matching
/// rule (in registration order) decides the outcome.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_when<F>(&self, matches: F, output: ProcessOutput)
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.rules
            .lock()
            .expect("rules lock")
            .push(Rule {
                matches: Box::new(matches),
                output,
            });
    }

    /// Fail commands matching `matches` with exit status 1 and `stderr`.
    pub fn fail_when<F>(&self, matches: F, stderr: &str)
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.respond_when(matches, ProcessOutput::failed(1, stderr.as_bytes().to_vec()));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Recorded commands rendered as display strings.
    pub fn rendered(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn count_matching<F: Fn(&CommandSpec) -> bool>(&self, matches: F) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        self.calls.lock().expect("calls lock").push(spec.clone());
        let rules = self.rules.lock().expect("rules lock");
        Ok(rules
            .iter()
            .find(|rule| (rule.matches)(spec))
            .map(|rule| rule.output.clone())
            .unwrap_or_else(|| ProcessOutput::ok(Vec::new())))
    }
}

/// Process variables a release run needs.
pub fn release_vars() -> Vec<(String, String)> {
    [
        ("HOME", "/home/ci"),
        ("BUILD_CA_CERT", "certs/ca.pem"),
        ("PIP_INDEX_URL", "https://nexus.example/simple"),
        ("NEXUS_USERNAME", "builder"),
        ("NEXUS_PASSWORD", "s3cret"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Finalized environment for a manual (or automated, with `version`) run.
pub fn release_env(automated_version: Option<&str>) -> FinalizedEnvironment {
    let mut vars = release_vars();
    let kind = match automated_version {
        Some(version) => {
            vars.push(("GO_PIPELINE_LABEL".to_string(), version.to_string()));
            RunKind::Automated
        }
        None => RunKind::Manual,
    };
    let overrides = Overrides {
        values: vars.into_iter().collect::<BTreeMap<_, _>>(),
    };
    finalize(&ShipyardConfig::default(), overrides, kind).expect("release env")
}

/// Scratch project root with a `dist/` directory.
pub struct TestProject {
    temp: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        fs::create_dir_all(temp.path().join("dist")).context("create dist")?;
        Ok(Self { temp })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn dist(&self) -> PathBuf {
        self.path().join("dist")
    }

    /// Create an empty file under `dist/`.
    pub fn add_artifact(&self, name: &str) -> Result<PathBuf> {
        let path = self.dist().join(name);
        fs::write(&path, b"").with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Add one wheel and one sdist of the default package.
    pub fn add_release_artifacts(&self) -> Result<()> {
        self.add_artifact("iotics.host.lib-1.0.0-py3-none-any.whl")?;
        self.add_artifact("iotics.host.lib-1.0.0.tar.gz")?;
        Ok(())
    }
}
