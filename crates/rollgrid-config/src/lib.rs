//! rollgrid-config — the rollout description.
//!
//! A rollout is described by a single JSON (or TOML) document naming the
//! binary to push, the load balancer that fronts the targets, the pool
//! pattern, and the ordered list of backends. Everything else has a
//! default.
//!
//! # Components
//!
//! - **`config`** — `RolloutConfig` parsing and validation
//! - **`backend`** — `Backend` (IP + port) and address checking
//! - **`error`** — `ConfigError`

pub mod backend;
pub mod config;
pub mod error;

pub use backend::{check_ip_port, Backend};
pub use config::{RolloutConfig, SshConfig, Transport};
pub use error::{ConfigError, ConfigResult};
