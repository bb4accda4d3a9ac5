//! Project configuration stored in `shipyard.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::matrix::CombinationMatrix;
use crate::core::types::FeatureFlag;
use crate::error::ConfigurationError;

pub const CONFIG_FILE: &str = "shipyard.toml";

/// Release configuration (TOML).
///
/// Missing fields default to the values the release pipeline has always used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShipyardConfig {
    pub python: PythonConfig,
    pub container: ContainerConfig,
    pub validation: ValidationConfig,
    pub ci: CiConfig,
    pub process: ProcessConfig,
    pub env: EnvConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PythonConfig {
    /// Interpreter used to create the virtual environment.
    pub interpreter: String,
    pub venv_dir: PathBuf,
    pub requirements: PathBuf,
    /// Packaging script, run with the venv's `bin` first on `PATH`.
    pub build_script: PathBuf,
    pub dist_dir: PathBuf,
    /// Paths relative to the root removed by `clean`.
    pub clean_paths: Vec<PathBuf>,
    /// Directory names removed anywhere under the root by `clean`.
    pub clean_dirs: Vec<String>,
    /// Directory name suffixes removed anywhere under the root by `clean`.
    pub clean_suffixes: Vec<String>,
    /// Upload target for `twine`; twine's own config is used when unset.
    pub repository_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container engine CLI.
    pub engine: String,
    pub image: String,
    pub dockerfile: PathBuf,
    /// Registry host used for login, tag and push.
    pub registry: String,
    /// Label attached to every transient container; bulk kill only targets it.
    pub transient_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// File name glob (only `*` is special) for built artifacts in `dist_dir`.
    pub artifact_pattern: String,
    /// Artifact extensions, validated in this order.
    pub extensions: Vec<String>,
    /// Optional dependency groups, in declaration order.
    pub flags: Vec<FeatureFlag>,
    pub helper_dockerfile: PathBuf,
    pub image_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CiConfig {
    /// A non-empty value of this variable marks an automated (CI) run.
    pub automated_marker: String,
    /// Variable carrying the pipeline version in automated runs.
    pub version_var: String,
    pub git_remote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Kill collaborator processes running longer than this. No limit when unset.
    pub timeout_secs: Option<u64>,
    /// Bytes of each output stream kept for diagnostics.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvConfig {
    /// Optional dotenv file with user overrides, relative to the root.
    pub user_env_file: PathBuf,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            venv_dir: PathBuf::from(".venv"),
            requirements: PathBuf::from("python/requirements.txt"),
            build_script: PathBuf::from("./build_all.sh"),
            dist_dir: PathBuf::from("dist"),
            clean_paths: vec![PathBuf::from("build"), PathBuf::from("dist")],
            clean_dirs: vec!["build".to_string()],
            clean_suffixes: vec![".egg-info".to_string()],
            repository_url: None,
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            image: "iotics-host-lib".to_string(),
            dockerfile: PathBuf::from("Dockerfile"),
            registry: "docker.io".to_string(),
            transient_label: "shipyard.transient=true".to_string(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            artifact_pattern: "iotics.host.lib-*".to_string(),
            extensions: vec![".whl".to_string(), ".tar.gz".to_string()],
            flags: vec![FeatureFlag::new("builder"), FeatureFlag::new("testing")],
            helper_dockerfile: PathBuf::from("Dockerfile.helper"),
            image_tag: "checker".to_string(),
        }
    }
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            automated_marker: "GO_SERVER_URL".to_string(),
            version_var: "GO_PIPELINE_LABEL".to_string(),
            git_remote: "origin".to_string(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            user_env_file: PathBuf::from(".env"),
        }
    }
}

impl Default for ShipyardConfig {
    fn default() -> Self {
        Self {
            python: PythonConfig::default(),
            container: ContainerConfig::default(),
            validation: ValidationConfig::default(),
            ci: CiConfig::default(),
            process: ProcessConfig::default(),
            env: EnvConfig::default(),
        }
    }
}

impl ShipyardConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: &str| Err(ConfigurationError::Invalid(msg.to_string()));
        if self.container.engine.trim().is_empty() {
            return invalid("container.engine must be non-empty");
        }
        if self.validation.flags.is_empty() {
            return invalid("validation.flags must list at least one flag");
        }
        CombinationMatrix::new(self.validation.flags.iter().cloned())?;
        if self.validation.extensions.is_empty() {
            return invalid("validation.extensions must list at least one extension");
        }
        if self.validation.artifact_pattern.trim().is_empty() {
            return invalid("validation.artifact_pattern must be non-empty");
        }
        if self.process.output_limit_bytes == 0 {
            return invalid("process.output_limit_bytes must be > 0");
        }
        if self.process.timeout_secs == Some(0) {
            return invalid("process.timeout_secs must be > 0 when set");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.process.timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ShipyardConfig::default()`.
pub fn load_config(path: &Path) -> Result<ShipyardConfig> {
    if !path.exists() {
        let cfg = ShipyardConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ShipyardConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ShipyardConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "[validation]\nflags = [\"cli\", \"grpc\", \"testing\"]\n\n[process]\ntimeout_secs = 600\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(
            cfg.validation.flags,
            vec![
                FeatureFlag::new("cli"),
                FeatureFlag::new("grpc"),
                FeatureFlag::new("testing")
            ]
        );
        assert_eq!(cfg.validation.extensions, vec![".whl", ".tar.gz"]);
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.container, ContainerConfig::default());
    }

    #[test]
    fn empty_flag_list_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[validation]\nflags = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.downcast_ref::<ConfigurationError>().is_some());
    }

    #[test]
    fn oversized_flag_list_is_rejected() {
        let mut cfg = ShipyardConfig::default();
        cfg.validation.flags = (0..64).map(|i| FeatureFlag::new(format!("extra{i}"))).collect();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigurationError::TooManyFlags { count: 64, .. })
        ));
    }

    #[test]
    fn default_config_serializes_and_parses_back() {
        let cfg = ShipyardConfig::default();
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: ShipyardConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, cfg);
    }
}
