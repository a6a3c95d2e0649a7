//! Resolution: environment variables layered over `gpi.toml`.

use crate::error::ConfigError;
use crate::loader::load_config_file;
use crate::types::{
    FileConfig, RuntimeConfig, DEFAULT_ENTRY, ENV_ATTACH, ENV_CONFIG, ENV_DEBUG, ENV_ENTRY,
    ENV_IMAGE, ENV_LOG, MAX_ATTACH_SECS,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolves the configuration from the process environment.
///
/// If `GPI_CONFIG` names a file it is loaded first; every other variable
/// overrides the corresponding file key.
pub fn resolve_from_env() -> Result<RuntimeConfig, ConfigError> {
    let lookup = |key: &str| std::env::var(key).ok();
    let file = match non_empty(lookup(ENV_CONFIG)) {
        Some(path) => Some(load_config_file(Path::new(&path))?),
        None => None,
    };
    resolve_config(file, lookup)
}

/// Merges an optional file configuration with variables from `lookup`.
///
/// Empty variables count as unset. The image path is required; a malformed
/// attach delay or debug toggle is rejected.
pub fn resolve_config<F>(file: Option<FileConfig>, lookup: F) -> Result<RuntimeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let section = file.map(|f| f.runtime).unwrap_or_default();

    let image = non_empty(lookup(ENV_IMAGE))
        .map(PathBuf::from)
        .or(section.image)
        .ok_or_else(|| ConfigError::MissingField(ENV_IMAGE.to_string()))?;

    let entry = non_empty(lookup(ENV_ENTRY))
        .or(section.entry)
        .unwrap_or_else(|| DEFAULT_ENTRY.to_string());

    let attach_secs = match non_empty(lookup(ENV_ATTACH)) {
        Some(raw) => Some(parse_attach(&raw)?),
        None => match section.attach {
            Some(secs) => Some(check_attach(secs, &secs.to_string())?),
            None => None,
        },
    };

    let debug = match non_empty(lookup(ENV_DEBUG)) {
        Some(raw) => parse_toggle(ENV_DEBUG, &raw)?,
        None => section.debug.unwrap_or(false),
    };

    Ok(RuntimeConfig {
        image,
        entry,
        attach: attach_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
        debug,
        log_filter: non_empty(lookup(ENV_LOG)).or(section.log),
        stop_on_failure: section.stop_on_failure.unwrap_or(true),
    })
}

/// Parses the attach delay in whole seconds.
fn parse_attach(raw: &str) -> Result<u64, ConfigError> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            key: ENV_ATTACH.to_string(),
            value: raw.to_string(),
            reason: "expected a whole number of seconds".to_string(),
        })?;
    check_attach(secs, raw)
}

fn check_attach(secs: u64, raw: &str) -> Result<u64, ConfigError> {
    if secs > MAX_ATTACH_SECS {
        return Err(ConfigError::InvalidValue {
            key: ENV_ATTACH.to_string(),
            value: raw.to_string(),
            reason: format!("must be between 0 and {MAX_ATTACH_SECS}"),
        });
    }
    Ok(secs)
}

/// Parses a boolean toggle in the spellings people put in environments.
fn parse_toggle(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected 1/0, true/false, yes/no or on/off".to_string(),
        }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
