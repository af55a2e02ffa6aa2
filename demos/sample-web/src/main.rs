//! A tiny web server to roll out with rollgrid.
//!
//! ```text
//! sample-web --port 8082 --node web-1
//! ```
//!
//! `/installedAt` reports the running executable's path, for checking by
//! hand which copy a port is serving. The rollout itself never reads it.
//!
//! # Local rollout
//!
//! From this directory, with the workspace built:
//!
//! ```text
//! cargo build --release
//! mkdir -p /tmp/rollgrid
//! for port in 8082 8083 8084; do
//!     cp target/release/sample-web /tmp/rollgrid/sample-web-$port
//!     /tmp/rollgrid/sample-web-$port --port $port --node old-$port &
//! done
//! ../../target/debug/rollgrid-lbd --listen 127.0.0.1:8000 --pattern / \
//!     --backend 127.0.0.1:8082 --backend 127.0.0.1:8083 --backend 127.0.0.1:8084 &
//! ../../target/debug/rollgrid rollout.json
//! ```
//!
//! Each port runs its own copy so the rollout stops only the instance it
//! is replacing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "sample-web", about = "Sample rollout target")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value = "8082")]
    port: u16,

    /// Name reported in the greeting.
    #[arg(long, default_value = "sample")]
    node: String,
}

#[derive(Clone)]
struct AppState {
    node: Arc<str>,
    installed_at: Arc<str>,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(greeting))
        .route("/healthz", get(healthz))
        .route("/installedAt", get(installed_at))
        .with_state(state)
}

async fn greeting(State(state): State<AppState>) -> String {
    format!("hello from {}\n", state.node)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn installed_at(State(state): State<AppState>) -> String {
    state.installed_at.to_string()
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let installed_at = std::env::current_exe()?.display().to_string();
    let state = AppState {
        node: cli.node.into(),
        installed_at: installed_at.into(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "sample-web listening");
    axum::serve(listener, build_router(state)).await
}
