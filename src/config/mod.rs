//! Config loading and validation.

mod load;
mod merge;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use load::{load, load_str, write_config};
pub use merge::apply_env_overrides;
pub(crate) use merge::apply_overrides;
pub use schema::{
    AssignmentPolicy, BridgeConfig, ExecutionMode, FileLoggingConfig, ItemsConfig, LogFormat,
    LogRotation, LoggingConfig, ReaperConfig, ServerConfig,
};

/// Problems detected before any subprocess is spawned.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
