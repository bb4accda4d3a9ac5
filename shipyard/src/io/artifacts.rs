//! Locating built artifacts in the dist directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::error::ConfigurationError;

/// Translate a file name glob (`*` matches any run of characters) plus a
/// literal extension into an anchored regex.
fn glob_regex(pattern: &str, extension: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    let source = format!("^{body}{}$", regex::escape(extension));
    Regex::new(&source).with_context(|| format!("compile artifact pattern {source}"))
}

/// Resolve exactly one artifact `<dir>/<pattern><extension>`.
///
/// Zero or several matches is a setup defect, reported as
/// [`ConfigurationError::ArtifactCount`] with the matches found.
pub fn resolve_artifact(dir: &Path, pattern: &str, extension: &str) -> Result<PathBuf> {
    let matcher = glob_regex(pattern, extension)?;
    let mut found = Vec::new();
    if dir.is_dir() {
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.context("read dist entry")?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if matcher.is_match(&name) && entry.path().is_file() {
                found.push(entry.path());
            }
        }
    }
    found.sort();
    debug!(dir = %dir.display(), pattern, extension, matches = found.len(), "artifact lookup");

    if found.len() != 1 {
        return Err(ConfigurationError::ArtifactCount {
            dir: dir.display().to_string(),
            pattern: pattern.to_string(),
            extension: extension.to_string(),
            found: found.iter().map(PathBuf::as_path).map(file_name).collect(),
        }
        .into());
    }
    Ok(found.remove(0))
}

/// Every regular file directly inside `dir`, sorted.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry.context("read dist entry")?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
