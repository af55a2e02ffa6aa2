//! Background health checking of pool members.
//!
//! Each round probes every member of every pool against the checks the
//! pool was created with, then sleeps for the shortest configured
//! interval.

use std::time::Duration;

use rollgrid_health::{ProbeResult, http_check};
use rollgrid_lb::{HealthChecks, MemoryLoadBalancer};
use tokio::sync::watch;
use tracing::{debug, info};

/// Round interval when no pool exists yet.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// Probe members until `shutdown` flips.
pub async fn run_health_loop(
    lb: MemoryLoadBalancer,
    probe_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let interval = check_all(&lb, probe_timeout).await;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("health checker stopping");
                return;
            }
        }
    }
}

/// One round over every pool. Returns how long to wait before the next.
pub async fn check_all(lb: &MemoryLoadBalancer, probe_timeout: Duration) -> Duration {
    let mut interval: Option<Duration> = None;
    for pattern in lb.patterns() {
        let Some((_, checks)) = lb.pool_config(&pattern) else {
            continue;
        };
        let every = Duration::from_secs(checks.interval_secs.max(1));
        interval = Some(interval.map_or(every, |i| i.min(every)));

        for backend in lb.backends(&pattern) {
            if passes(&backend.to_string(), &checks, probe_timeout).await {
                lb.mark_healthy(&pattern, backend);
            } else {
                debug!(%pattern, %backend, "backend failing health checks");
                lb.mark_unhealthy(&pattern, backend);
            }
        }
    }
    interval.unwrap_or(IDLE_INTERVAL)
}

async fn passes(endpoint: &str, checks: &HealthChecks, probe_timeout: Duration) -> bool {
    for check in &checks.checks {
        let result =
            http_check(endpoint, &check.url_path, &check.healthy_values, probe_timeout).await;
        if result != ProbeResult::Healthy {
            return false;
        }
    }
    true
}
