//! `gpi.toml` loading.

use crate::error::ConfigError;
use crate::types::FileConfig;
use std::path::Path;

/// Loads a `gpi.toml` file from disk.
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses a `gpi.toml` document from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<FileConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}
