//! Error types for configuration loading and validation.

/// Errors that can occur when assembling a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A required setting is absent from both the environment and the file.
    #[error("missing required setting: {0}")]
    MissingField(String),

    /// A setting is present but its value cannot be used.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// The variable or key name.
        key: String,
        /// The rejected value as written.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Whether the error must stop the simulator process.
    ///
    /// A missing image only aborts runtime startup; malformed values are
    /// configuration bugs the user must fix before anything runs.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConfigError::MissingField(_))
    }
}
