//! Lifecycle error types.

use std::path::PathBuf;

use modelgrid_drift::DriftError;
use modelgrid_state::StateError;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Problems with `modelgrid.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Drift(#[from] DriftError),
}
