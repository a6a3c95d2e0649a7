//! Loading and validation of the runtime configuration consumed by the entry hooks.
//!
//! Configuration comes from process environment variables, optionally layered
//! over a `gpi.toml` file named by `GPI_CONFIG`. The result is a strongly-typed
//! [`RuntimeConfig`].

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config_file, load_config_from_str};
pub use resolve::{resolve_config, resolve_from_env};
pub use types::*;
