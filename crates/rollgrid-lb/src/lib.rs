//! rollgrid-lb — the load balancer control plane as seen by a rollout.
//!
//! A rollout never routes traffic itself. It asks the load balancer for
//! the health of a pool, and adds or removes one backend at a time while
//! that backend is being replaced.
//!
//! # Components
//!
//! - **`client`** — `LoadBalancer` trait and the JSON-over-HTTP client
//! - **`memory`** — In-process pool table (tests, dry runs)
//! - **`types`** — Pool status, pool type, health check wire types

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{HttpLoadBalancer, LbFuture, LoadBalancer};
pub use error::{LbError, LbResult};
pub use memory::MemoryLoadBalancer;
pub use types::{HealthChecks, PoolHealth, PoolStatus, PoolType, StatusCheck};
