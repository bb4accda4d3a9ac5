//! Package install checks across the optional dependency matrix.
//!
//! For every configured artifact extension the single built artifact is
//! installed into a throwaway checker image once per dependency combination.
//! The walk is strictly sequential and stops at the first failing combination;
//! a missing or ambiguous artifact aborts before any combination is tried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{error, info, instrument};

use crate::core::env::FinalizedEnvironment;
use crate::core::matrix::CombinationMatrix;
use crate::core::types::{Combination, MatrixReport, ValidationOutcome};
use crate::error::CombinationFailed;
use crate::io::artifacts::{file_name, resolve_artifact};
use crate::io::config::ShipyardConfig;
use crate::io::container::{ContainerEngine, ImageBuild};
use crate::io::environment::PIP_INDEX_URL;

pub struct ArtifactValidator {
    engine: Arc<ContainerEngine>,
    dist_dir: PathBuf,
    artifact_pattern: String,
    extensions: Vec<String>,
    matrix: CombinationMatrix,
    helper_dockerfile: PathBuf,
    image_tag: String,
    index_url: String,
}

impl ArtifactValidator {
    pub fn new(
        engine: Arc<ContainerEngine>,
        cfg: &ShipyardConfig,
        root: &Path,
        env: &FinalizedEnvironment,
    ) -> Result<Self> {
        let matrix = CombinationMatrix::new(cfg.validation.flags.iter().cloned())?;
        Ok(Self {
            engine,
            dist_dir: root.join(&cfg.python.dist_dir),
            artifact_pattern: cfg.validation.artifact_pattern.clone(),
            extensions: cfg.validation.extensions.clone(),
            matrix,
            helper_dockerfile: cfg.validation.helper_dockerfile.clone(),
            image_tag: cfg.validation.image_tag.clone(),
            index_url: env.get(PIP_INDEX_URL).unwrap_or_default().to_string(),
        })
    }

    pub fn matrix(&self) -> &CombinationMatrix {
        &self.matrix
    }

    /// Build the checker image for one (artifact, combination) pair and run it.
    pub fn validate(&self, artifact: &Path, combination: &Combination) -> ValidationOutcome {
        let artifact_name = file_name(artifact);
        let dependencies = combination.canonical();
        let build = ImageBuild {
            tag: self.image_tag.clone(),
            dockerfile: self.helper_dockerfile.clone(),
            context: PathBuf::from("."),
            build_args: vec![
                (PIP_INDEX_URL.to_string(), self.index_url.clone()),
                ("PKG_NAME".to_string(), artifact_name.clone()),
                ("DEPENDENCIES".to_string(), dependencies),
            ],
        };
        let result = self
            .engine
            .build(&build)
            .context("build checker image")
            .and_then(|()| {
                self.engine
                    .run_disposable(&self.image_tag)
                    .context("run checker image")
            });
        match result {
            Ok(()) => ValidationOutcome::Passed {
                artifact: artifact_name,
                combination: combination.clone(),
            },
            Err(error) => ValidationOutcome::Failed {
                artifact: artifact_name,
                combination: combination.clone(),
                error,
            },
        }
    }

    /// Walk the whole matrix for the artifact with `extension`.
    ///
    /// Artifact resolution errors abort the walk before any combination runs.
    #[instrument(skip(self))]
    pub fn check_extension(&self, extension: &str) -> Result<MatrixReport> {
        let artifact = resolve_artifact(&self.dist_dir, &self.artifact_pattern, extension)?;
        let name = file_name(&artifact);
        let total = self.matrix.len();

        for (position, combination) in self.matrix.enumerate().enumerate() {
            let index = position + 1;
            println!("    checking {name} with dependencies {combination} ({index}/{total})");
            let outcome = self.validate(&artifact, &combination);
            if !outcome.is_pass() {
                error!(artifact = %name, combination = %combination, index, total, "install check failed");
                return Ok(MatrixReport::StoppedAt {
                    index,
                    total,
                    outcome,
                });
            }
            info!(artifact = %name, combination = %combination, "install check passed");
        }
        Ok(MatrixReport::AllPassed {
            artifact: name,
            checked: total,
        })
    }

    /// Check every configured extension in order.
    ///
    /// Returns the number of combinations checked. A failed combination
    /// becomes an error carrying [`CombinationFailed`] context.
    pub fn check_packages(&self) -> Result<usize> {
        let mut checked_total = 0;
        for extension in &self.extensions {
            match self.check_extension(extension)? {
                MatrixReport::AllPassed { artifact, checked } => {
                    println!("    {artifact}: all {checked} combinations passed");
                    checked_total += checked;
                }
                MatrixReport::StoppedAt {
                    index,
                    total,
                    outcome,
                } => match outcome {
                    ValidationOutcome::Failed {
                        artifact,
                        combination,
                        error,
                    } => {
                        return Err(error.context(CombinationFailed {
                            index,
                            total,
                            artifact,
                            combination: combination.canonical(),
                        }));
                    }
                    ValidationOutcome::Passed { artifact, .. } => {
                        bail!("matrix walk for {artifact} stopped on a passing combination");
                    }
                },
            }
        }
        Ok(checked_total)
    }
}
