//! rollgrid-lbd — a load balancer control plane for local rollouts.
//!
//! Keeps pools in a `MemoryLoadBalancer`, serves them over the JSON
//! routes `HttpLoadBalancer` calls, and probes every member so pool
//! health follows the targets.
//!
//! # Routes
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | POST | `/v1/pool/health` | `{pattern}` → `PoolHealth` |
//! | POST | `/v1/pool/add` | `{pattern, pool_type, health_checks}` |
//! | POST | `/v1/backend/add` | `{pattern, backend}` |
//! | POST | `/v1/backend/remove` | `{pattern, backend}` |

pub mod checker;
pub mod handlers;

use axum::Router;
use axum::routing::post;
use rollgrid_lb::MemoryLoadBalancer;

/// Shared state for the control plane handlers.
#[derive(Clone)]
pub struct LbdState {
    pub lb: MemoryLoadBalancer,
}

/// Build the control plane router over `lb`.
pub fn build_router(lb: MemoryLoadBalancer) -> Router {
    Router::new()
        .route("/v1/pool/health", post(handlers::pool_health))
        .route("/v1/pool/add", post(handlers::add_pool))
        .route("/v1/backend/add", post(handlers::add_backend))
        .route("/v1/backend/remove", post(handlers::remove_backend))
        .with_state(LbdState { lb })
}
