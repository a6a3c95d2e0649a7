//! Configuration types: the raw `gpi.toml` layout and the resolved runtime settings.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Path to the test image loaded by the entry hook (required).
pub const ENV_IMAGE: &str = "GPI_RUNTIME_IMAGE";
/// Seconds to sleep after printing the pid, for attaching a debugger.
pub const ENV_ATTACH: &str = "GPI_ATTACH";
/// Debug-trace toggle.
pub const ENV_DEBUG: &str = "GPI_DEBUG";
/// `tracing` filter directive.
pub const ENV_LOG: &str = "GPI_LOG";
/// Entry symbol resolved in the test image.
pub const ENV_ENTRY: &str = "GPI_ENTRY";
/// Optional path to a `gpi.toml` file.
pub const ENV_CONFIG: &str = "GPI_CONFIG";

/// Longest accepted attach delay, in seconds.
pub const MAX_ATTACH_SECS: u64 = 600;
/// Entry symbol used when none is configured.
pub const DEFAULT_ENTRY: &str = "gpi_test_entry";

/// Top-level layout of a `gpi.toml` file.
///
/// Every field is optional: the file only supplies defaults that
/// environment variables override.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// The `[runtime]` table.
    #[serde(default)]
    pub runtime: RuntimeSection,
}

/// The `[runtime]` table of `gpi.toml`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    /// Path to the test image.
    pub image: Option<PathBuf>,
    /// Entry symbol name inside the image.
    pub entry: Option<String>,
    /// Attach delay in seconds.
    pub attach: Option<u64>,
    /// Debug-trace toggle.
    pub debug: Option<bool>,
    /// `tracing` filter directive.
    pub log: Option<String>,
    /// Ask the simulator to stop when a task fails with nobody waiting on it.
    pub stop_on_failure: Option<bool>,
}

/// Fully resolved settings consumed by the entry hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Path to the test image.
    pub image: PathBuf,
    /// Entry symbol name inside the image.
    pub entry: String,
    /// Delay before initialization continues, for debugger attach.
    pub attach: Option<Duration>,
    /// Whether runtime crates log at trace level.
    pub debug: bool,
    /// Explicit `tracing` filter directive, if any.
    pub log_filter: Option<String>,
    /// Ask the simulator to stop when a task fails with nobody waiting on it.
    pub stop_on_failure: bool,
}

impl RuntimeConfig {
    /// Creates a configuration for `image` with every optional setting at its default.
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            entry: DEFAULT_ENTRY.to_string(),
            attach: None,
            debug: false,
            log_filter: None,
            stop_on_failure: true,
        }
    }
}
