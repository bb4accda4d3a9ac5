//! Finalized process environment for a release run.
//!
//! Values come from three precedence classes: explicit overrides (process
//! environment, user env file, CLI), derived values computed from other keys,
//! and defaults. A key is filled by the highest class that provides it and is
//! never replaced afterwards. Resolution is pure: identical inputs always
//! produce an identical [`FinalizedEnvironment`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigurationError;

/// Where a resolved value came from. Ordered from lowest to highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    Default,
    Derived,
    Override,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Derived => "derived",
            Self::Override => "override",
        })
    }
}

/// Pure function computing a derived value from its declared inputs.
pub type DeriveFn = fn(&Inputs<'_>) -> String;

/// How a variable obtains a value when no override is present.
#[derive(Clone)]
pub enum VarRule {
    /// Must be supplied as an override.
    Required,
    /// May be omitted entirely.
    Optional,
    /// Falls back to a fixed value.
    Default(String),
    /// Computed from other keys, all of which must resolve.
    Derived { inputs: Vec<String>, derive: DeriveFn },
}

impl fmt::Debug for VarRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("Required"),
            Self::Optional => f.write_str("Optional"),
            Self::Default(value) => f.debug_tuple("Default").field(value).finish(),
            Self::Derived { inputs, .. } => f.debug_struct("Derived").field("inputs", inputs).finish(),
        }
    }
}

/// Declaration of one variable the run depends on.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub key: String,
    pub rule: VarRule,
}

impl VarDecl {
    pub fn required(key: &str) -> Self {
        Self {
            key: key.to_string(),
            rule: VarRule::Required,
        }
    }

    pub fn optional(key: &str) -> Self {
        Self {
            key: key.to_string(),
            rule: VarRule::Optional,
        }
    }

    pub fn with_default(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            rule: VarRule::Default(value.into()),
        }
    }

    pub fn derived(key: &str, inputs: &[&str], derive: DeriveFn) -> Self {
        Self {
            key: key.to_string(),
            rule: VarRule::Derived {
                inputs: inputs.iter().map(|k| (*k).to_string()).collect(),
                derive,
            },
        }
    }
}

/// Read-only view of already-resolved inputs handed to a [`DeriveFn`].
#[derive(Debug)]
pub struct Inputs<'a> {
    values: BTreeMap<&'a str, &'a str>,
}

impl Inputs<'_> {
    /// Value of a declared input. Inputs are checked before the derive runs,
    /// so a declared key is always present.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub source: Source,
}

/// Immutable result of resolution, shared by every component of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizedEnvironment {
    values: BTreeMap<String, Resolved>,
}

const SECRET_MARKERS: [&str; 3] = ["PASSWORD", "TOKEN", "SECRET"];

impl FinalizedEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|r| r.value.as_str())
    }

    pub fn source(&self, key: &str) -> Option<Source> {
        self.values.get(key).map(|r| r.source)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigurationError> {
        self.get(key)
            .ok_or_else(|| ConfigurationError::MissingVariable {
                key: key.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resolved)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Key/value pairs for handing to child processes.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str(), v.value.as_str()))
    }

    /// Stable `KEY=value` listing, one per line, sorted by key.
    pub fn render(&self, mask_secrets: bool) -> String {
        let mut out = String::new();
        for (key, resolved) in &self.values {
            let value = if mask_secrets && is_secret(key) {
                "********"
            } else {
                resolved.value.as_str()
            };
            out.push_str(&format!("{key}={value}  # {}\n", resolved.source));
        }
        out
    }
}

fn is_secret(key: &str) -> bool {
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Resolve declarations against explicit overrides.
///
/// Overrides for undeclared keys are carried through unchanged so collaborators
/// can still read them.
pub fn resolve(
    declarations: &[VarDecl],
    overrides: &BTreeMap<String, String>,
) -> Result<FinalizedEnvironment, ConfigurationError> {
    let mut values: BTreeMap<String, Resolved> = overrides
        .iter()
        .map(|(k, v)| {
            (
                k.clone(),
                Resolved {
                    value: v.clone(),
                    source: Source::Override,
                },
            )
        })
        .collect();

    let defaults: BTreeMap<&str, &str> = declarations
        .iter()
        .filter_map(|decl| match &decl.rule {
            VarRule::Default(value) => Some((decl.key.as_str(), value.as_str())),
            _ => None,
        })
        .collect();

    for decl in declarations {
        let VarRule::Derived { inputs, derive } = &decl.rule else {
            continue;
        };
        if values.contains_key(&decl.key) {
            continue;
        }
        let mut resolved_inputs = BTreeMap::new();
        for input in inputs {
            let value = values
                .get(input)
                .map(|r| r.value.as_str())
                .or_else(|| defaults.get(input.as_str()).copied())
                .ok_or_else(|| ConfigurationError::MissingInput {
                    key: input.clone(),
                    needed_by: decl.key.clone(),
                })?;
            resolved_inputs.insert(input.as_str(), value);
        }
        let value = derive(&Inputs {
            values: resolved_inputs,
        });
        values.insert(
            decl.key.clone(),
            Resolved {
                value,
                source: Source::Derived,
            },
        );
    }

    for (key, value) in defaults {
        values.entry(key.to_string()).or_insert_with(|| Resolved {
            value: value.to_string(),
            source: Source::Default,
        });
    }

    for decl in declarations {
        if matches!(decl.rule, VarRule::Required) && !values.contains_key(&decl.key) {
            return Err(ConfigurationError::MissingVariable {
                key: decl.key.clone(),
            });
        }
    }

    Ok(FinalizedEnvironment { values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn greeting(inputs: &Inputs<'_>) -> String {
        format!("hello {}", inputs.get("NAME"))
    }

    #[test]
    fn override_beats_default_and_derived() {
        let decls = vec![
            VarDecl::derived("GREETING", &["NAME"], greeting),
            VarDecl::with_default("NAME", "world"),
            VarDecl::with_default("GREETING", "hi"),
        ];

        let env = resolve(&decls, &overrides(&[("GREETING", "yo")])).expect("resolve");
        assert_eq!(env.get("GREETING"), Some("yo"));
        assert_eq!(env.source("GREETING"), Some(Source::Override));

        let env = resolve(&decls, &BTreeMap::new()).expect("resolve");
        assert_eq!(env.get("GREETING"), Some("hello world"));
        assert_eq!(env.source("GREETING"), Some(Source::Derived));
        assert_eq!(env.source("NAME"), Some(Source::Default));
    }

    #[test]
    fn derivation_sees_overridden_inputs() {
        let decls = vec![
            VarDecl::with_default("NAME", "world"),
            VarDecl::derived("GREETING", &["NAME"], greeting),
        ];
        let env = resolve(&decls, &overrides(&[("NAME", "ci")])).expect("resolve");
        assert_eq!(env.get("GREETING"), Some("hello ci"));
    }

    #[test]
    fn missing_required_is_configuration_error() {
        let decls = vec![VarDecl::required("PIP_INDEX_URL")];
        let err = resolve(&decls, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingVariable {
                key: "PIP_INDEX_URL".to_string()
            }
        );
    }

    #[test]
    fn missing_input_names_dependent_key() {
        let decls = vec![VarDecl::derived("GREETING", &["NAME"], greeting)];
        let err = resolve(&decls, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingInput {
                key: "NAME".to_string(),
                needed_by: "GREETING".to_string(),
            }
        );
    }

    #[test]
    fn overridden_derivation_does_not_require_inputs() {
        let decls = vec![VarDecl::derived("GREETING", &["NAME"], greeting)];
        let env = resolve(&decls, &overrides(&[("GREETING", "set")])).expect("resolve");
        assert_eq!(env.get("GREETING"), Some("set"));
    }

    #[test]
    fn optional_may_be_absent() {
        let decls = vec![VarDecl::optional("GO_PIPELINE_LABEL")];
        let env = resolve(&decls, &BTreeMap::new()).expect("resolve");
        assert_eq!(env.get("GO_PIPELINE_LABEL"), None);
    }

    #[test]
    fn resolving_twice_is_byte_identical() {
        let decls = vec![
            VarDecl::with_default("NAME", "world"),
            VarDecl::derived("GREETING", &["NAME"], greeting),
            VarDecl::required("HOME"),
        ];
        let input = overrides(&[("HOME", "/home/ci"), ("EXTRA", "1")]);
        let first = resolve(&decls, &input).expect("first");
        let second = resolve(&decls, &input).expect("second");
        assert_eq!(first, second);
        assert_eq!(first.render(false), second.render(false));
    }

    #[test]
    fn render_masks_secrets() {
        let env = resolve(&[], &overrides(&[("NEXUS_PASSWORD", "hunter2"), ("USER", "ci")]))
            .expect("resolve");
        let rendered = env.render(true);
        assert!(rendered.contains("NEXUS_PASSWORD=********"));
        assert!(rendered.contains("USER=ci"));
        assert!(!rendered.contains("hunter2"));
    }
}
