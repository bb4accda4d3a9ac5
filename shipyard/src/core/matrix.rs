//! Exhaustive enumeration of non-empty feature flag subsets.

use std::collections::HashSet;

use crate::core::types::{Combination, FeatureFlag};
use crate::error::ConfigurationError;

/// Upper bound on flags; each one doubles the number of install checks.
pub const MAX_FLAGS: usize = 16;

/// Ordered, duplicate-free set of flags to validate against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinationMatrix {
    flags: Vec<FeatureFlag>,
}

impl CombinationMatrix {
    pub fn new(flags: impl IntoIterator<Item = FeatureFlag>) -> Result<Self, ConfigurationError> {
        let flags: Vec<FeatureFlag> = flags.into_iter().collect();
        if flags.len() > MAX_FLAGS {
            return Err(ConfigurationError::TooManyFlags {
                count: flags.len(),
                max: MAX_FLAGS,
            });
        }
        let mut seen = HashSet::new();
        for flag in &flags {
            if !seen.insert(flag.as_str()) {
                return Err(ConfigurationError::DuplicateFlag(flag.to_string()));
            }
        }
        Ok(Self { flags })
    }

    pub fn flags(&self) -> &[FeatureFlag] {
        &self.flags
    }

    /// Number of non-empty subsets: `2^n - 1`.
    pub fn len(&self) -> usize {
        u32::try_from(self.flags.len())
            .ok()
            .and_then(|n| 1usize.checked_shl(n))
            .map_or(usize::MAX, |subsets| subsets - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Enumerate all non-empty subsets by increasing size, then by declaration
    /// order within a size. Each call starts a fresh, identical sequence.
    pub fn enumerate(&self) -> Combinations<'_> {
        Combinations {
            flags: &self.flags,
            size: 1,
            indices: None,
        }
    }
}

/// Lazy iterator over the subsets of a [`CombinationMatrix`].
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    flags: &'a [FeatureFlag],
    size: usize,
    /// Current k-subset as ascending indices; `None` before the first of a size.
    indices: Option<Vec<usize>>,
}

impl Combinations<'_> {
    /// Advance `indices` to the next k-subset in lexicographic order.
    fn advance(indices: &mut [usize], n: usize) -> bool {
        let k = indices.len();
        for pos in (0..k).rev() {
            if indices[pos] < n - k + pos {
                indices[pos] += 1;
                for next in pos + 1..k {
                    indices[next] = indices[next - 1] + 1;
                }
                return true;
            }
        }
        false
    }
}

impl Iterator for Combinations<'_> {
    type Item = Combination;

    fn next(&mut self) -> Option<Combination> {
        let n = self.flags.len();
        loop {
            if self.size > n {
                return None;
            }
            let advanced = match self.indices.as_mut() {
                Some(indices) => Self::advance(indices, n),
                None => false,
            };
            if !advanced {
                if self.indices.is_some() {
                    self.size += 1;
                    self.indices = None;
                    continue;
                }
                self.indices = Some((0..self.size).collect());
            }
            let indices = self.indices.as_deref().unwrap_or_default();
            let members = indices.iter().map(|&i| self.flags[i].clone()).collect();
            return Some(Combination::from_members(members));
        }
    }
}
