//! In-process load balancer control plane.
//!
//! Keeps pool membership in a table guarded by a `RwLock`. Backends are
//! healthy when added; `mark_unhealthy` flips one so the pool reports
//! `Degraded`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rollgrid_config::Backend;
use tracing::debug;

use crate::client::{LbFuture, LoadBalancer};
use crate::error::{LbError, LbResult};
use crate::types::{HealthChecks, PoolHealth, PoolStatus, PoolType};

struct Member {
    backend: Backend,
    healthy: bool,
}

struct PoolEntry {
    pool_type: PoolType,
    health_checks: HealthChecks,
    members: Vec<Member>,
}

/// Pool table held in memory. Clones share the same table.
#[derive(Clone)]
pub struct MemoryLoadBalancer {
    pools: Arc<RwLock<HashMap<String, PoolEntry>>>,
}

impl MemoryLoadBalancer {
    pub fn new() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a pool already holding `backends`, all healthy.
    pub fn with_pool(self, pattern: &str, backends: &[Backend]) -> Self {
        {
            let mut pools = self.pools.write().expect("pools lock");
            pools.insert(
                pattern.to_string(),
                PoolEntry {
                    pool_type: PoolType::P2c,
                    health_checks: HealthChecks::healthz("/healthz"),
                    members: backends
                        .iter()
                        .map(|b| Member {
                            backend: *b,
                            healthy: true,
                        })
                        .collect(),
                },
            );
        }
        self
    }

    /// Current members of a pool, in insertion order.
    pub fn backends(&self, pattern: &str) -> Vec<Backend> {
        let pools = self.pools.read().expect("pools lock");
        pools
            .get(pattern)
            .map(|p| p.members.iter().map(|m| m.backend).collect())
            .unwrap_or_default()
    }

    /// Every pool pattern, sorted.
    pub fn patterns(&self) -> Vec<String> {
        let pools = self.pools.read().expect("pools lock");
        let mut patterns: Vec<String> = pools.keys().cloned().collect();
        patterns.sort();
        patterns
    }

    pub fn has_pool(&self, pattern: &str) -> bool {
        self.pools.read().expect("pools lock").contains_key(pattern)
    }

    /// Selection policy and health checks a pool was created with.
    pub fn pool_config(&self, pattern: &str) -> Option<(PoolType, HealthChecks)> {
        let pools = self.pools.read().expect("pools lock");
        pools
            .get(pattern)
            .map(|p| (p.pool_type, p.health_checks.clone()))
    }

    /// Mark a backend as failing its health checks.
    pub fn mark_unhealthy(&self, pattern: &str, backend: Backend) {
        self.set_health(pattern, backend, false);
    }

    /// Mark a backend as passing its health checks.
    pub fn mark_healthy(&self, pattern: &str, backend: Backend) {
        self.set_health(pattern, backend, true);
    }

    fn set_health(&self, pattern: &str, backend: Backend, healthy: bool) {
        let mut pools = self.pools.write().expect("pools lock");
        if let Some(entry) = pools.get_mut(pattern) {
            for member in &mut entry.members {
                if member.backend == backend {
                    member.healthy = healthy;
                    debug!(pattern, %backend, healthy, "backend health set");
                }
            }
        }
    }

    fn health(&self, pattern: &str) -> LbResult<PoolHealth> {
        let pools = self.pools.read().expect("pools lock");
        let entry = pools
            .get(pattern)
            .ok_or_else(|| LbError::PoolNotFound(pattern.to_string()))?;

        let status = if entry.members.is_empty() {
            PoolStatus::Empty
        } else if entry.members.iter().all(|m| m.healthy) {
            PoolStatus::Full
        } else {
            PoolStatus::Degraded
        };

        Ok(PoolHealth {
            status,
            backends: entry.members.iter().map(|m| m.backend).collect(),
        })
    }

    fn insert_backend(&self, pattern: &str, backend: Backend) -> LbResult<()> {
        let mut pools = self.pools.write().expect("pools lock");
        let entry = pools
            .get_mut(pattern)
            .ok_or_else(|| LbError::PoolNotFound(pattern.to_string()))?;

        if entry.members.iter().any(|m| m.backend == backend) {
            return Err(LbError::BackendExists {
                pattern: pattern.to_string(),
                backend,
            });
        }
        entry.members.push(Member {
            backend,
            healthy: true,
        });
        debug!(pattern, %backend, "backend added");
        Ok(())
    }

    fn delete_backend(&self, pattern: &str, backend: Backend) -> LbResult<()> {
        let mut pools = self.pools.write().expect("pools lock");
        let entry = pools
            .get_mut(pattern)
            .ok_or_else(|| LbError::PoolNotFound(pattern.to_string()))?;

        let before = entry.members.len();
        entry.members.retain(|m| m.backend != backend);
        if entry.members.len() == before {
            return Err(LbError::BackendNotFound {
                pattern: pattern.to_string(),
                backend,
            });
        }
        debug!(pattern, %backend, "backend removed");
        Ok(())
    }

    fn insert_pool(
        &self,
        pattern: &str,
        pool_type: PoolType,
        health_checks: &HealthChecks,
    ) -> LbResult<()> {
        let mut pools = self.pools.write().expect("pools lock");
        if pools.contains_key(pattern) {
            return Err(LbError::PoolExists(pattern.to_string()));
        }
        pools.insert(
            pattern.to_string(),
            PoolEntry {
                pool_type,
                health_checks: health_checks.clone(),
                members: Vec::new(),
            },
        );
        debug!(pattern, ?pool_type, "pool added");
        Ok(())
    }
}

impl Default for MemoryLoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for MemoryLoadBalancer {
    fn pool_health<'a>(&'a self, pattern: &'a str) -> LbFuture<'a, PoolHealth> {
        Box::pin(async move { self.health(pattern) })
    }

    fn add_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()> {
        Box::pin(async move { self.insert_backend(pattern, backend) })
    }

    fn remove_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()> {
        Box::pin(async move { self.delete_backend(pattern, backend) })
    }

    fn add_pool<'a>(
        &'a self,
        pattern: &'a str,
        pool_type: PoolType,
        health_checks: &'a HealthChecks,
    ) -> LbFuture<'a, ()> {
        Box::pin(async move { self.insert_pool(pattern, pool_type, health_checks) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(addr: &str) -> Backend {
        addr.parse().unwrap()
    }

    #[tokio::test]
    async fn unknown_pool_is_an_error() {
        let lb = MemoryLoadBalancer::new();
        assert!(matches!(
            lb.pool_health("/").await,
            Err(LbError::PoolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn new_pool_reports_empty() {
        let lb = MemoryLoadBalancer::new();
        lb.add_pool("/", PoolType::RoundRobin, &HealthChecks::healthz("/healthz"))
            .await
            .unwrap();

        let (pool_type, checks) = lb.pool_config("/").unwrap();
        assert_eq!(pool_type, PoolType::RoundRobin);
        assert_eq!(checks.checks[0].url_path, "/healthz");

        let health = lb.pool_health("/").await.unwrap();
        assert_eq!(health.status, PoolStatus::Empty);
        assert!(health.backends.is_empty());

        assert!(matches!(
            lb.add_pool("/", PoolType::P2c, &HealthChecks::healthz("/healthz"))
                .await,
            Err(LbError::PoolExists(_))
        ));
    }

    #[tokio::test]
    async fn add_and_remove_backends() {
        let lb = MemoryLoadBalancer::new().with_pool("/", &[backend("10.0.0.1:80")]);

        lb.add_backend("/", backend("10.0.0.2:80")).await.unwrap();
        let health = lb.pool_health("/").await.unwrap();
        assert_eq!(health.status, PoolStatus::Full);
        assert_eq!(health.backends.len(), 2);

        lb.remove_backend("/", backend("10.0.0.1:80")).await.unwrap();
        assert_eq!(lb.backends("/"), vec![backend("10.0.0.2:80")]);
    }

    #[tokio::test]
    async fn duplicate_and_missing_backends_are_errors() {
        let lb = MemoryLoadBalancer::new().with_pool("/", &[backend("10.0.0.1:80")]);

        assert!(matches!(
            lb.add_backend("/", backend("10.0.0.1:80")).await,
            Err(LbError::BackendExists { .. })
        ));
        assert!(matches!(
            lb.remove_backend("/", backend("10.0.0.9:80")).await,
            Err(LbError::BackendNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn unhealthy_member_degrades_pool() {
        let lb = MemoryLoadBalancer::new()
            .with_pool("/", &[backend("10.0.0.1:80"), backend("10.0.0.2:80")]);

        lb.mark_unhealthy("/", backend("10.0.0.2:80"));
        assert_eq!(lb.pool_health("/").await.unwrap().status, PoolStatus::Degraded);

        lb.mark_healthy("/", backend("10.0.0.2:80"));
        assert_eq!(lb.pool_health("/").await.unwrap().status, PoolStatus::Full);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let lb = MemoryLoadBalancer::new().with_pool("/", &[]);
        let other = lb.clone();
        other.add_backend("/", backend("10.0.0.1:80")).await.unwrap();
        assert_eq!(lb.backends("/").len(), 1);
        assert!(lb.has_pool("/"));
    }
}
