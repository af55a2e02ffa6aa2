//! Control plane wire types.

use std::fmt;

use rollgrid_config::Backend;
use serde::{Deserialize, Serialize};

/// Aggregate health of a pool as reported by the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    Unknown,
    /// No backends registered.
    Empty,
    /// Every registered backend is healthy.
    Full,
    /// Some registered backends are failing health checks.
    Degraded,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Empty => "EMPTY",
            Self::Full => "FULL",
            Self::Degraded => "DEGRADED",
        };
        f.write_str(name)
    }
}

/// Result of a pool health query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHealth {
    pub status: PoolStatus,
    pub backends: Vec<Backend>,
}

/// Backend selection policy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    /// Power of two random choices.
    P2c,
    RoundRobin,
}

/// A check that passes when `url_path` answers with one of
/// `healthy_values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub url_path: String,
    pub healthy_values: Vec<String>,
}

/// Health checks the load balancer runs against each backend of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChecks {
    pub checks: Vec<StatusCheck>,
    pub interval_secs: u64,
}

impl HealthChecks {
    /// The check every rollout target is expected to pass: `ok` on
    /// `path`, probed every five seconds.
    pub fn healthz(path: &str) -> Self {
        Self {
            checks: vec![StatusCheck {
                url_path: path.to_string(),
                healthy_values: vec!["ok".to_string(), "OK".to_string()],
            }],
            interval_secs: 5,
        }
    }
}
