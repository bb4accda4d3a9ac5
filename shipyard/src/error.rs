//! Error taxonomy for release orchestration.
//!
//! Orchestration code propagates `anyhow::Error`. The typed errors below are
//! either the root cause of a failure or attached as context, so the single
//! top-level handler can classify a failure with `downcast_ref`.

use thiserror::Error;

/// Fatal setup defects. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("missing required variable {key}")]
    MissingVariable { key: String },

    #[error("missing variable {key} (needed to derive {needed_by})")]
    MissingInput { key: String, needed_by: String },

    #[error(
        "artifact resolution failed: expected exactly one '{pattern}{extension}' in {dir}, found {}: {found:?}",
        .found.len()
    )]
    ArtifactCount {
        dir: String,
        pattern: String,
        extension: String,
        found: Vec<String>,
    },

    #[error("unknown task '{name}'{}", .required_by.as_deref().map(|by| format!(" (required by '{by}')")).unwrap_or_default())]
    UnknownTask {
        name: String,
        required_by: Option<String>,
    },

    #[error("task '{0}' declared twice")]
    DuplicateTask(String),

    #[error("duplicate feature flag '{0}'")]
    DuplicateFlag(String),

    #[error("{count} feature flags given, at most {max} are supported")]
    TooManyFlags { count: usize, max: usize },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The task graph contains a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected: {}", .chain.join(" -> "))]
pub struct CycleDetectedError {
    /// Task names along the cycle; first and last entries are the same task.
    pub chain: Vec<String>,
}

/// A collaborator process exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{}` {}{}", self.command_line(), self.status(), self.stderr_suffix())]
pub struct ExternalProcessError {
    pub program: String,
    pub args: Vec<String>,
    pub code: Option<i32>,
    pub timed_out: bool,
    /// Tail of captured stderr, trimmed.
    pub stderr: String,
}

impl ExternalProcessError {
    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn status(&self) -> String {
        match (self.timed_out, self.code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => format!("exited with status {code}"),
            (false, None) => "terminated by signal".to_string(),
        }
    }

    fn stderr_suffix(&self) -> String {
        if self.stderr.is_empty() {
            String::new()
        } else {
            format!(": {}", self.stderr)
        }
    }
}

/// Context marker naming the task whose action failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task '{task}' failed")]
pub struct TaskFailed {
    pub task: String,
}

/// Context marker naming the combination that stopped a validation matrix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "stopped at combination {index}/{total}: pkg '{artifact}' failed to install with dependencies '{combination}'"
)]
pub struct CombinationFailed {
    /// 1-based position in the enumeration.
    pub index: usize,
    pub total: usize,
    pub artifact: String,
    pub combination: String,
}

/// Teardown failure. Logged, never propagated.
#[derive(Debug, Error)]
#[error("cleanup failed: {0:#}")]
pub struct CleanupError(pub anyhow::Error);

/// Find a typed error anywhere in an `anyhow` chain, including context layers.
pub fn find_in_chain<T>(err: &anyhow::Error) -> Option<&T>
where
    T: std::error::Error + Send + Sync + 'static,
{
    if let Some(found) = err.downcast_ref::<T>() {
        return Some(found);
    }
    err.chain().find_map(|cause| cause.downcast_ref::<T>())
}
