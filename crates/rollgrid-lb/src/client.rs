//! Load balancer control plane client.
//!
//! `LoadBalancer` is the seam the rollout talks through. `HttpLoadBalancer`
//! speaks JSON over HTTP/1.1: every call is a `POST` to a `/v1/...` path
//! with the arguments in the body, so pool patterns never need escaping.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use rollgrid_config::Backend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{LbError, LbResult};
use crate::types::{HealthChecks, PoolHealth, PoolType};

/// Boxed future returned by every control plane call.
pub type LbFuture<'a, T> = Pin<Box<dyn Future<Output = LbResult<T>> + Send + 'a>>;

/// Operations a rollout needs from the load balancer.
pub trait LoadBalancer: Send + Sync {
    /// Health of the pool named `pattern` and its registered backends.
    fn pool_health<'a>(&'a self, pattern: &'a str) -> LbFuture<'a, PoolHealth>;

    /// Register `backend` in the pool.
    fn add_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()>;

    /// Deregister `backend` from the pool.
    fn remove_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()>;

    /// Create an empty pool.
    fn add_pool<'a>(
        &'a self,
        pattern: &'a str,
        pool_type: PoolType,
        health_checks: &'a HealthChecks,
    ) -> LbFuture<'a, ()>;
}

#[derive(Serialize)]
struct PoolRequest<'a> {
    pattern: &'a str,
}

#[derive(Serialize)]
struct BackendRequest<'a> {
    pattern: &'a str,
    backend: Backend,
}

#[derive(Serialize)]
struct AddPoolRequest<'a> {
    pattern: &'a str,
    pool_type: PoolType,
    health_checks: &'a HealthChecks,
}

/// JSON-over-HTTP client for the load balancer control plane.
#[derive(Debug, Clone)]
pub struct HttpLoadBalancer {
    address: String,
    timeout: Duration,
}

impl HttpLoadBalancer {
    /// Client for the control plane listening on `address` (`ip:port`).
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call<Req, Resp>(&self, path: &str, request: &Req) -> LbResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = self.post(path, request).await?;
        serde_json::from_slice(&body).map_err(|e| LbError::Codec(e.to_string()))
    }

    async fn post<Req: Serialize + Sync>(&self, path: &str, request: &Req) -> LbResult<Bytes> {
        let payload = serde_json::to_vec(request).map_err(|e| LbError::Codec(e.to_string()))?;

        match tokio::time::timeout(self.timeout, self.send(path, payload)).await {
            Ok(result) => result,
            Err(_) => Err(LbError::Timeout {
                path: path.to_string(),
            }),
        }
    }

    async fn send(&self, path: &str, payload: Vec<u8>) -> LbResult<Bytes> {
        let connect_err = |reason: String| LbError::Connect {
            addr: self.address.clone(),
            reason,
        };

        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(path)
            .header("host", &self.address)
            .header("content-type", "application/json")
            .header("user-agent", "rollgrid/0.1")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| LbError::Codec(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| connect_err(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(LbError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        debug!(addr = %self.address, path, status = status.as_u16(), "control plane call");
        Ok(body)
    }
}

impl LoadBalancer for HttpLoadBalancer {
    fn pool_health<'a>(&'a self, pattern: &'a str) -> LbFuture<'a, PoolHealth> {
        Box::pin(async move { self.call("/v1/pool/health", &PoolRequest { pattern }).await })
    }

    fn add_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()> {
        Box::pin(async move {
            self.post("/v1/backend/add", &BackendRequest { pattern, backend })
                .await
                .map(|_| ())
        })
    }

    fn remove_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()> {
        Box::pin(async move {
            self.post("/v1/backend/remove", &BackendRequest { pattern, backend })
                .await
                .map(|_| ())
        })
    }

    fn add_pool<'a>(
        &'a self,
        pattern: &'a str,
        pool_type: PoolType,
        health_checks: &'a HealthChecks,
    ) -> LbFuture<'a, ()> {
        Box::pin(async move {
            let request = AddPoolRequest {
                pattern,
                pool_type,
                health_checks,
            };
            self.post("/v1/pool/add", &request).await.map(|_| ())
        })
    }
}
