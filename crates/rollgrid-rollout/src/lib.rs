//! rollgrid rolling deployments.
//!
//! Pushes a new binary to every backend of a load balancer pool without
//! taking the pool down. Each backend is upgraded by an [`Action`]: drain
//! it, stop the old binary, copy and start the new one, wait for it to
//! report healthy, and put it back. A [`Workflow`] runs the actions, first
//! a few canaries one at a time, then the rest under a concurrency cap,
//! and stops starting new ones once the failure budget is spent.
//!
//! # Components
//!
//! - **`action`** — per-endpoint state machine, resumable at the failed stage
//! - **`workflow`** — precondition check, canary gate, bulk phase, retries
//! - **`context`** — deadlines and cancellation shared by both
//! - **`stage`** — the upgrade stages in order

pub mod action;
pub mod context;
pub mod error;
pub mod stage;
pub mod workflow;

#[cfg(test)]
mod testkit;

pub use action::{Action, Collaborators, StageTimeouts, BINARY_MODE};
pub use context::{CancelHandle, ContextError, RunContext};
pub use error::{ActionError, PreconditionError, RolloutError, RolloutResult};
pub use stage::Stage;
pub use workflow::{ActionSnapshot, EndState, FailedAction, Workflow, WorkflowStatus};
