//! Shared deterministic types for validation.
//!
//! These types define stable contracts between the matrix, the validator and
//! the container build arguments. They must serialize identically across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Label naming an optional dependency group (a packaging "extra").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlag(String);

impl FeatureFlag {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureFlag {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// Duplicate-free subset of feature flags, members kept in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination {
    members: Vec<FeatureFlag>,
}

impl Combination {
    /// Members must already be unique and in declaration order.
    pub(crate) fn from_members(members: Vec<FeatureFlag>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[FeatureFlag] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Serialize as `[a,b]`, or `""` when empty.
    ///
    /// This string is passed verbatim as the `DEPENDENCIES` build argument and
    /// appended to the package name by the helper image (`pkg.whl[a,b]`).
    pub fn canonical(&self) -> String {
        if self.members.is_empty() {
            return String::new();
        }
        let joined = self
            .members
            .iter()
            .map(FeatureFlag::as_str)
            .collect::<Vec<_>>()
            .join(",");
        format!("[{joined}]")
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Result of one install check for an (artifact, combination) pair.
#[derive(Debug)]
pub enum ValidationOutcome {
    Passed {
        artifact: String,
        combination: Combination,
    },
    Failed {
        artifact: String,
        combination: Combination,
        error: anyhow::Error,
    },
}

impl ValidationOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    pub fn artifact(&self) -> &str {
        match self {
            Self::Passed { artifact, .. } | Self::Failed { artifact, .. } => artifact,
        }
    }

    pub fn combination(&self) -> &Combination {
        match self {
            Self::Passed { combination, .. } | Self::Failed { combination, .. } => combination,
        }
    }
}

/// Terminal state of a validation matrix walk. There is no partial success.
#[derive(Debug)]
pub enum MatrixReport {
    /// Every combination passed.
    AllPassed { artifact: String, checked: usize },
    /// Walk stopped at the first failure; later combinations were not attempted.
    StoppedAt {
        /// 1-based position of the failing combination.
        index: usize,
        total: usize,
        outcome: ValidationOutcome,
    },
}
