//! Collects explicit overrides and declares the release pipeline's variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::env::{FinalizedEnvironment, Inputs, VarDecl, resolve};
use crate::io::config::ShipyardConfig;

pub const VERSION: &str = "VERSION";
pub const DOCKER_BUILD_ARGS: &str = "DOCKER_BUILD_ARGS";
pub const PIP_INDEX_URL: &str = "PIP_INDEX_URL";
pub const NEXUS_USERNAME: &str = "NEXUS_USERNAME";
pub const NEXUS_PASSWORD: &str = "NEXUS_PASSWORD";
/// Marks the run as automated after resolution, whatever signal decided it.
pub const AUTOMATED: &str = "SHIPYARD_AUTOMATED";

/// Version used by manual runs when none is supplied.
const MANUAL_VERSION: &str = "dev";

/// How the automated-run signal is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunKind {
    /// Read the configured CI marker variable.
    #[default]
    Detect,
    Automated,
    Manual,
}

fn home_cert(inputs: &Inputs<'_>) -> String {
    Path::new(inputs.get("HOME"))
        .join(inputs.get("BUILD_CA_CERT"))
        .display()
        .to_string()
}

fn nexus_username(inputs: &Inputs<'_>) -> String {
    inputs.get(NEXUS_USERNAME).to_string()
}

fn nexus_password(inputs: &Inputs<'_>) -> String {
    inputs.get(NEXUS_PASSWORD).to_string()
}

fn docker_build_args(inputs: &Inputs<'_>) -> String {
    format!("{PIP_INDEX_URL}={}", inputs.get(PIP_INDEX_URL))
}

fn pipeline_version(inputs: &Inputs<'_>) -> String {
    inputs.get("SHIPYARD_PIPELINE_VERSION").to_string()
}

/// Variables every release run depends on.
///
/// Credentials for the package index are derived from the shared Nexus
/// account unless set explicitly. `VERSION` is only derived for automated
/// runs; manual runs fall back to `dev`.
pub fn release_declarations(automated: bool) -> Vec<VarDecl> {
    let mut decls = vec![
        VarDecl::required("HOME"),
        VarDecl::required("BUILD_CA_CERT"),
        VarDecl::required(PIP_INDEX_URL),
        VarDecl::optional(NEXUS_USERNAME),
        VarDecl::optional(NEXUS_PASSWORD),
        VarDecl::derived("TWINE_CERT", &["HOME", "BUILD_CA_CERT"], home_cert),
        VarDecl::derived("TWINE_USERNAME", &[NEXUS_USERNAME], nexus_username),
        VarDecl::derived("TWINE_PASSWORD", &[NEXUS_PASSWORD], nexus_password),
        VarDecl::derived("PIP_USERNAME", &[NEXUS_USERNAME], nexus_username),
        VarDecl::derived("PIP_PASSWORD", &[NEXUS_PASSWORD], nexus_password),
        VarDecl::derived("PIP_CERT", &["HOME", "BUILD_CA_CERT"], home_cert),
        VarDecl::derived(DOCKER_BUILD_ARGS, &[PIP_INDEX_URL], docker_build_args),
    ];
    if automated {
        decls.push(VarDecl::derived(
            VERSION,
            &["SHIPYARD_PIPELINE_VERSION"],
            pipeline_version,
        ));
    } else {
        decls.push(VarDecl::with_default(VERSION, MANUAL_VERSION));
    }
    decls
}

/// Explicit overrides gathered from the process and the user env file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub values: BTreeMap<String, String>,
}

impl Overrides {
    /// Layer the user env file (if present) under the given process variables.
    /// Process variables win.
    pub fn collect<I>(process: I, user_env_file: Option<&Path>) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut values = BTreeMap::new();
        if let Some(path) = user_env_file.filter(|p| p.exists()) {
            for item in dotenvy::from_path_iter(path)
                .with_context(|| format!("read user env file {}", path.display()))?
            {
                let (key, value) =
                    item.with_context(|| format!("parse user env file {}", path.display()))?;
                values.insert(key, value);
            }
            debug!(path = %path.display(), count = values.len(), "loaded user env file");
        }
        values.extend(process);
        Ok(Self { values })
    }

    /// Set `key` unless it is already present.
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }
}

/// Resolve the finalized environment for one run.
pub fn finalize(
    cfg: &ShipyardConfig,
    mut overrides: Overrides,
    kind: RunKind,
) -> Result<FinalizedEnvironment> {
    let automated = match kind {
        RunKind::Automated => true,
        RunKind::Manual => false,
        RunKind::Detect => overrides
            .values
            .get(&cfg.ci.automated_marker)
            .is_some_and(|v| !v.trim().is_empty()),
    };
    if let Some(label) = overrides.values.get(&cfg.ci.version_var).cloned() {
        overrides.set_if_absent("SHIPYARD_PIPELINE_VERSION", label);
    }
    overrides
        .values
        .insert(AUTOMATED.to_string(), automated.to_string());

    let env = resolve(&release_declarations(automated), &overrides.values)?;
    if automated {
        info!(version = env.get(VERSION).unwrap_or_default(), "automated build");
    }
    Ok(env)
}

/// Whether the finalized environment belongs to an automated run.
pub fn is_automated(env: &FinalizedEnvironment) -> bool {
    env.get(AUTOMATED) == Some("true")
}

/// Absolute location of the user env file, if configured.
pub fn user_env_path(root: &Path, cfg: &ShipyardConfig) -> Option<PathBuf> {
    let file = &cfg.env.user_env_file;
    if file.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(file))
}
