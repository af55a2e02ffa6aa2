//! rollgrid-lbd — local load balancer control plane.
//!
//! ```text
//! rollgrid-lbd --listen 127.0.0.1:8000 --pattern / \
//!     --backend 127.0.0.1:8082 --backend 127.0.0.1:8083
//! ```
//!
//! Seeded backends are assumed healthy until the first check round.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use rollgrid_config::Backend;
use rollgrid_lb::MemoryLoadBalancer;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "rollgrid-lbd", about = "Local load balancer control plane for rollgrid")]
struct Cli {
    /// Address to serve the control plane on.
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Pool to create at startup.
    #[arg(long)]
    pattern: Option<String>,

    /// Backend to seed the startup pool with (repeatable).
    #[arg(long = "backend", requires = "pattern")]
    backends: Vec<Backend>,

    /// Per-probe timeout in seconds.
    #[arg(long, default_value = "2")]
    probe_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rollgrid_lbd=debug")),
        )
        .init();

    let cli = Cli::parse();

    let mut lb = MemoryLoadBalancer::new();
    if let Some(pattern) = &cli.pattern {
        lb = lb.with_pool(pattern, &cli.backends);
        info!(%pattern, backends = cli.backends.len(), "seeded pool");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let checker = tokio::spawn(rollgrid_lbd::checker::run_health_loop(
        lb.clone(),
        Duration::from_secs(cli.probe_timeout),
        shutdown_rx,
    ));

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(addr = %cli.listen, "control plane listening");
    axum::serve(listener, rollgrid_lbd::build_router(lb))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = checker.await;
    Ok(())
}
