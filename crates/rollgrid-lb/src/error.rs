//! Load balancer control plane errors.

use rollgrid_config::Backend;
use thiserror::Error;

pub type LbResult<T> = Result<T, LbError>;

#[derive(Debug, Error)]
pub enum LbError {
    #[error("pool {0:?} not found")]
    PoolNotFound(String),

    #[error("pool {0:?} already exists")]
    PoolExists(String),

    #[error("backend {backend} already in pool {pattern:?}")]
    BackendExists { pattern: String, backend: Backend },

    #[error("backend {backend} not in pool {pattern:?}")]
    BackendNotFound { pattern: String, backend: Backend },

    #[error("can't reach load balancer at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("load balancer request {path} timed out")]
    Timeout { path: String },

    #[error("load balancer returned {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("bad load balancer payload: {0}")]
    Codec(String),
}
