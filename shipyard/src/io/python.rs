//! Python packaging adapter: virtualenv, build script, upload, cleanup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::io::artifacts::list_files;
use crate::io::config::PythonConfig;
use crate::io::process::{CommandSpec, ProcessRunner, run_checked};

/// Virtualenv-scoped packaging tool for one project root.
pub struct PythonPackager {
    runner: Arc<dyn ProcessRunner>,
    cfg: PythonConfig,
    root: PathBuf,
}

impl PythonPackager {
    pub fn new(runner: Arc<dyn ProcessRunner>, cfg: PythonConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            cfg,
            root: root.into(),
        }
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.root.join(&self.cfg.dist_dir)
    }

    fn venv_bin(&self) -> PathBuf {
        self.root.join(&self.cfg.venv_dir).join("bin")
    }

    /// Command running `program` from the virtualenv's `bin` directory.
    fn venv_command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(self.venv_bin().join(program).display().to_string())
            .current_dir(&self.root)
    }

    /// Create the virtualenv (if missing) and install build requirements.
    #[instrument(skip_all)]
    pub fn setup_environment(&self) -> Result<()> {
        let venv = self.root.join(&self.cfg.venv_dir);
        if venv.join("bin").exists() {
            debug!(venv = %venv.display(), "virtualenv already present");
        } else {
            let spec = CommandSpec::new(&self.cfg.interpreter)
                .args(["-m", "venv"])
                .arg(venv.display().to_string())
                .current_dir(&self.root);
            run_checked(self.runner.as_ref(), &spec).context("create virtualenv")?;
        }

        let upgrade = self
            .venv_command("pip")
            .args(["install", "--upgrade", "pip", "setuptools"]);
        run_checked(self.runner.as_ref(), &upgrade).context("upgrade pip and setuptools")?;

        let install = self
            .venv_command("pip")
            .args(["install", "--no-cache-dir", "--requirement"])
            .arg(self.cfg.requirements.display().to_string());
        run_checked(self.runner.as_ref(), &install).context("install requirements")?;
        info!("python build environment ready");
        Ok(())
    }

    /// Run the packaging script with the virtualenv first on `PATH`.
    #[instrument(skip_all)]
    pub fn package(&self) -> Result<()> {
        let path = match std::env::var_os("PATH") {
            Some(existing) => {
                let mut dirs = vec![self.venv_bin()];
                dirs.extend(std::env::split_paths(&existing));
                std::env::join_paths(dirs).context("build PATH")?
            }
            None => self.venv_bin().into_os_string(),
        };
        let spec = CommandSpec::new(self.cfg.build_script.display().to_string())
            .env("PATH", path.to_string_lossy())
            .env("VIRTUAL_ENV", self.root.join(&self.cfg.venv_dir).display().to_string())
            .current_dir(&self.root);
        run_checked(self.runner.as_ref(), &spec).context("run packaging script")?;
        Ok(())
    }

    /// Upload every file in the dist directory to the package index.
    #[instrument(skip_all)]
    pub fn publish(&self) -> Result<usize> {
        let dist = self.dist_dir();
        let files = list_files(&dist).with_context(|| format!("list {}", dist.display()))?;
        if files.is_empty() {
            bail!("nothing to publish in {}", dist.display());
        }
        let mut spec = self.venv_command("twine").arg("upload");
        if let Some(url) = &self.cfg.repository_url {
            spec = spec.args(["--repository-url", url.as_str()]);
        }
        spec = spec.args(files.iter().map(|f| f.display().to_string()));
        run_checked(self.runner.as_ref(), &spec).context("upload packages")?;
        info!(count = files.len(), "published packages");
        Ok(files.len())
    }

    /// Remove build outputs: the configured root-relative paths, plus
    /// directories with a configured name or suffix anywhere under the root
    /// (outside the virtualenv).
    #[instrument(skip_all)]
    pub fn clean(&self) -> Result<Vec<PathBuf>> {
        let targets = clean_targets(&self.root, &self.root.join(&self.cfg.venv_dir), &self.cfg)?;
        for target in &targets {
            fs::remove_dir_all(target).with_context(|| format!("remove {}", target.display()))?;
            debug!(path = %target.display(), "removed");
        }
        info!(removed = targets.len(), "clean finished");
        Ok(targets)
    }
}

fn clean_targets(root: &Path, venv: &Path, cfg: &PythonConfig) -> Result<Vec<PathBuf>> {
    let mut targets: Vec<PathBuf> = cfg
        .clean_paths
        .iter()
        .map(|relative| root.join(relative))
        .filter(|path| path.is_dir())
        .collect();
    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.context("walk project")?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        if path == venv || entry.file_name() == ".git" || targets.iter().any(|t| t == path) {
            walker.skip_current_dir();
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let matched = cfg.clean_dirs.iter().any(|d| *d == name)
            || cfg.clean_suffixes.iter().any(|s| name.ends_with(s.as_str()));
        if matched {
            targets.push(path.to_path_buf());
            walker.skip_current_dir();
        }
    }
    Ok(targets)
}
