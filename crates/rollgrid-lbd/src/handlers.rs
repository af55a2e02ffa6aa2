//! Control plane handlers.
//!
//! Errors come back as plain text with a status code: 404 for an unknown
//! pool or backend, 409 for a duplicate.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rollgrid_config::Backend;
use rollgrid_lb::{HealthChecks, LbError, LoadBalancer, PoolType};
use serde::Deserialize;
use tracing::info;

use crate::LbdState;

#[derive(Debug, Deserialize)]
pub struct PoolRequest {
    pub pattern: String,
}

#[derive(Debug, Deserialize)]
pub struct BackendRequest {
    pub pattern: String,
    pub backend: Backend,
}

#[derive(Debug, Deserialize)]
pub struct AddPoolRequest {
    pub pattern: String,
    pub pool_type: PoolType,
    pub health_checks: HealthChecks,
}

fn error_response(e: LbError) -> Response {
    let status = match e {
        LbError::PoolNotFound(_) | LbError::BackendNotFound { .. } => StatusCode::NOT_FOUND,
        LbError::PoolExists(_) | LbError::BackendExists { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

/// POST /v1/pool/health
pub async fn pool_health(
    State(state): State<LbdState>,
    Json(req): Json<PoolRequest>,
) -> Response {
    match state.lb.pool_health(&req.pattern).await {
        Ok(health) => Json(health).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/pool/add
pub async fn add_pool(
    State(state): State<LbdState>,
    Json(req): Json<AddPoolRequest>,
) -> Response {
    match state
        .lb
        .add_pool(&req.pattern, req.pool_type, &req.health_checks)
        .await
    {
        Ok(()) => {
            info!(pattern = %req.pattern, pool_type = ?req.pool_type, "pool created");
            StatusCode::CREATED.into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /v1/backend/add
pub async fn add_backend(
    State(state): State<LbdState>,
    Json(req): Json<BackendRequest>,
) -> Response {
    match state.lb.add_backend(&req.pattern, req.backend).await {
        Ok(()) => {
            info!(pattern = %req.pattern, backend = %req.backend, "backend added");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /v1/backend/remove
pub async fn remove_backend(
    State(state): State<LbdState>,
    Json(req): Json<BackendRequest>,
) -> Response {
    match state.lb.remove_backend(&req.pattern, req.backend).await {
        Ok(()) => {
            info!(pattern = %req.pattern, backend = %req.backend, "backend removed");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}
