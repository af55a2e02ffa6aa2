//! Health check probe logic.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tracing::debug;

/// Body a healthy target answers with.
pub const HEALTHY_BODY: &str = "ok";

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The body was `ok`.
    Healthy,
    /// The target answered with anything else.
    Unhealthy,
    /// The probe could not be executed (connection error, timeout).
    Failed,
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>>;

/// Probes one endpoint (`ip:port`) once.
pub trait HealthProbe: Send + Sync {
    fn probe<'a>(&'a self, endpoint: &'a str) -> ProbeFuture<'a>;
}

/// Probes `http://<endpoint><path>` over HTTP/1.1.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    path: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    /// Override the per-probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe<'a>(&'a self, endpoint: &'a str) -> ProbeFuture<'a> {
        Box::pin(http_probe(endpoint, &self.path, self.timeout))
    }
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Healthy` if the trimmed body is `ok`, `Unhealthy` for any
/// other body, or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    http_check(address, path, &[HEALTHY_BODY], timeout).await
}

/// Like `http_probe`, but healthy when the trimmed body equals any of
/// `healthy_values`.
pub async fn http_check<S: AsRef<str>>(
    address: &str,
    path: &str,
    healthy_values: &[S],
    timeout: Duration,
) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", address)
            .header("user-agent", "rollgrid-health/0.1")
            .body(Empty::<Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        let resp = match sender.send_request(req).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                return ProbeResult::Failed;
            }
        };

        let status = resp.status();
        match resp.into_body().collect().await {
            Ok(collected) => {
                let body = collected.to_bytes();
                if matches_any(&body, healthy_values) {
                    ProbeResult::Healthy
                } else {
                    debug!(%status, %uri, "health probe body was not ok");
                    ProbeResult::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe body read failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

fn matches_any<S: AsRef<str>>(body: &[u8], healthy_values: &[S]) -> bool {
    std::str::from_utf8(body)
        .is_ok_and(|s| healthy_values.iter().any(|v| s.trim() == v.as_ref()))
}
