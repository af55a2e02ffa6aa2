//! Error types for rollout configuration.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or validating a rollout config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't open workflow configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is misconfigured: {reason}")]
    Parse { path: String, reason: String },

    #[error("address {addr:?} is not ip:port: {reason}")]
    Address { addr: String, reason: String },

    #[error("LB({addr}) is not correct: {source}")]
    LoadBalancer {
        addr: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("Backend({addr}) is not correct: {source}")]
    Backend {
        addr: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("must specify some Backends")]
    NoBackends,

    #[error("Pattern({0:?}) is invalid")]
    Pattern(String),

    #[error("Concurrency({0}) is invalid")]
    Concurrency(usize),
}
