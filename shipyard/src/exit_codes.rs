//! Stable exit codes for the `shipyard` CLI.

use crate::error::{CombinationFailed, ConfigurationError, CycleDetectedError, find_in_chain};

/// Every requested goal completed.
pub const OK: i32 = 0;
/// A task or collaborator process failed.
pub const FAILED: i32 = 1;
/// Invalid setup: missing variables, bad config, unknown goals, artifact
/// count, dependency cycles, bad CLI usage.
pub const INVALID: i32 = 2;
/// A package failed its install check for some dependency combination.
pub const VALIDATION: i32 = 3;

/// Classify a top-level error.
pub fn for_error(err: &anyhow::Error) -> i32 {
    if find_in_chain::<ConfigurationError>(err).is_some()
        || find_in_chain::<CycleDetectedError>(err).is_some()
    {
        INVALID
    } else if find_in_chain::<CombinationFailed>(err).is_some() {
        VALIDATION
    } else {
        FAILED
    }
}
