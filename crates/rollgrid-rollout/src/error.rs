use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rollgrid_config::{Backend, ConfigError};
use rollgrid_exec::{ExecError, Signal};
use rollgrid_lb::{LbError, PoolStatus};
use thiserror::Error;

use crate::context::ContextError;

/// Why one endpoint's upgrade stopped.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("cannot open binary to copy ({}): {source}", path.display())]
    OpenSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("problem removing backend from pool: {0}")]
    RemoveBackend(#[source] LbError),

    #[error("problem finding existing PIDs: {0}")]
    FindPids(#[source] ExecError),

    #[error("failed to send SIG{signal} to PID {pid}: {source}")]
    Signal {
        signal: Signal,
        pid: u32,
        #[source]
        source: ExecError,
    },

    #[error("PIDs {pids:?} still running {waited:?} after SIGKILL")]
    StillRunning { pids: Vec<u32>, waited: Duration },

    #[error("failed to copy binary to {dst}: {source}")]
    Copy {
        dst: String,
        #[source]
        source: ExecError,
    },

    #[error("failed to start binary after copy: {0}")]
    Start(#[source] ExecError),

    #[error("{endpoint} did not become healthy within {window:?}")]
    Unhealthy { endpoint: String, window: Duration },

    #[error("problem adding backend to pool: {0}")]
    AddBackend(#[source] LbError),
}

/// The load balancer's view of the pool does not allow a rollout.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("pool health for {pattern} failed: {source}")]
    PoolHealth {
        pattern: String,
        #[source]
        source: LbError,
    },

    #[error("pool health for {pattern} did not answer: {source}")]
    Context {
        pattern: String,
        #[source]
        source: ContextError,
    },

    #[error("pool is empty but {configured} backends are configured")]
    EmptyPool { configured: usize },

    #[error("backend {0} is in the pool but not in the config")]
    UnexpectedBackend(Backend),

    #[error("configured backend {0} is missing from the pool")]
    MissingBackend(Backend),

    #[error("pool was not at full health, was {0}")]
    PoolNotHealthy(PoolStatus),
}

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("could not create workflow: {0}")]
    Config(#[from] ConfigError),

    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("canary failure on endpoint {endpoint}: {source}")]
    Canary {
        endpoint: String,
        #[source]
        source: Arc<ActionError>,
    },

    #[error("exceeded max failures: {failures} > {max}")]
    MaxFailuresExceeded { failures: u32, max: u32 },

    #[error("{remaining} endpoint(s) still failing after {passes} retry passes")]
    RetryExhausted { remaining: usize, passes: u32 },

    #[error("retries interrupted: {0}")]
    Interrupted(#[from] ContextError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;
