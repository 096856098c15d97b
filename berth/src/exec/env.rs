//! Environment merging for exec'd processes.
//!
//! Precedence, lowest to highest: the container's default environment,
//! env-file entries, explicit `--env` entries. Keys compare exactly.

use berth_shared::errors::{BerthError, BerthResult};
use std::collections::HashMap;
use std::path::PathBuf;

const WHITESPACE: &[char] = &[' ', '\t'];
const UTF8_BOM: &str = "\u{feff}";

/// Merge env-file entries and explicit entries into one ordered override list.
///
/// Bare `KEY` entries take their value from `lookup` (the invoking process's
/// environment in production).
pub fn merge_env_file_and_flags<F>(
    env_files: &[PathBuf],
    env: &[String],
    lookup: F,
) -> BerthResult<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = Vec::new();
    for path in env_files {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BerthError::InvalidArgument(format!(
                "failed to read env file {}: {}",
                path.display(),
                e
            ))
        })?;
        merged.extend(parse_env_file(&content, &lookup)?);
    }

    for entry in env {
        merged.push(with_host_env(entry, &lookup)?);
    }
    Ok(merged)
}

/// Parse the contents of one env file.
///
/// Lines are `KEY=VALUE` (value kept verbatim) or bare `KEY`, which is
/// resolved through `lookup` and dropped when unset.
pub fn parse_env_file<F>(content: &str, lookup: F) -> BerthResult<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let mut entries = Vec::new();

    for raw in content.lines() {
        let line = raw.trim_start_matches(WHITESPACE);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim_start_matches(WHITESPACE);
                if key.is_empty() {
                    return Err(BerthError::InvalidArgument(format!(
                        "no variable name on line '{}'",
                        line
                    )));
                }
                if key.contains(WHITESPACE) {
                    return Err(BerthError::InvalidArgument(format!(
                        "variable '{}' contains whitespaces",
                        key
                    )));
                }
                entries.push(format!("{}={}", key, value));
            }
            None => {
                let key = line.trim_end_matches(WHITESPACE);
                if key.contains(WHITESPACE) {
                    return Err(BerthError::InvalidArgument(format!(
                        "variable '{}' contains whitespaces",
                        key
                    )));
                }
                if let Some(value) = lookup(key) {
                    entries.push(format!("{}={}", key, value));
                }
            }
        }
    }
    Ok(entries)
}

/// Resolve one explicit entry: bare `KEY` picks up the host value if any.
fn with_host_env<F>(entry: &str, lookup: &F) -> BerthResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let key = entry.split_once('=').map_or(entry, |(k, _)| k);
    if key.is_empty() {
        return Err(BerthError::InvalidArgument(format!(
            "invalid environment variable: {}",
            entry
        )));
    }
    if entry.contains('=') {
        return Ok(entry.to_string());
    }
    Ok(match lookup(key) {
        Some(value) => format!("{}={}", key, value),
        None => entry.to_string(),
    })
}

/// Apply `overrides` on top of `defaults`.
///
/// `KEY=VALUE` replaces the entry with the same key in place or appends it.
/// A bare `KEY` unsets the key.
pub fn replace_or_append(defaults: &[String], overrides: &[String]) -> Vec<String> {
    let mut results: Vec<Option<String>> = Vec::with_capacity(defaults.len() + overrides.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in defaults {
        let key = env_key(entry);
        if let Some(&i) = index.get(key) {
            results[i] = Some(entry.clone());
        } else {
            index.insert(key.to_string(), results.len());
            results.push(Some(entry.clone()));
        }
    }

    for entry in overrides {
        if !entry.contains('=') {
            if let Some(&i) = index.get(entry.as_str()) {
                results[i] = None;
            }
            continue;
        }

        let key = env_key(entry);
        match index.get(key) {
            Some(&i) => results[i] = Some(entry.clone()),
            None => {
                index.insert(key.to_string(), results.len());
                results.push(Some(entry.clone()));
            }
        }
    }

    results.into_iter().flatten().collect()
}

fn env_key(entry: &str) -> &str {
    entry.split_once('=').map_or(entry, |(k, _)| k)
}
