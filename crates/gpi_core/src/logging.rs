//! Process-wide `tracing` subscriber setup.

use gpi_config::RuntimeConfig;
use tracing_subscriber::filter::{Directive, EnvFilter};

const DEFAULT_FILTER: &str = "info";
const RUNTIME_CRATES: [&str; 3] = ["gpi_core", "gpi_model", "gpi_native"];

/// Installs the global subscriber, writing to stderr.
///
/// Returns `false` if a subscriber was already installed, which happens when
/// the host process or an earlier runtime set one up.
pub fn init(config: &RuntimeConfig) -> bool {
    let filter = build_filter(config.log_filter.as_deref(), config.debug);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Builds the filter: the explicit directive when it parses, `info`
/// otherwise, with runtime crates raised to `trace` in debug mode.
pub fn build_filter(directive: Option<&str>, debug: bool) -> EnvFilter {
    let mut filter = directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
    if debug {
        for krate in RUNTIME_CRATES {
            if let Ok(d) = format!("{krate}=trace").parse::<Directive>() {
                filter = filter.add_directive(d);
            }
        }
    }
    filter
}
