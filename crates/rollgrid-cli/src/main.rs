use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rollgrid_config::RolloutConfig;
use rollgrid_health::HttpHealthProbe;
use rollgrid_lb::HttpLoadBalancer;
use rollgrid_rollout::{Collaborators, RunContext};
use tracing::{error, info};

mod deploy;
mod report;

#[derive(Parser)]
#[command(
    name = "rollgrid",
    about = "rollgrid — roll a new binary out to every backend of a load balancer pool",
    version
)]
struct Cli {
    /// Rollout config file (JSON, or TOML with a .toml extension)
    config: PathBuf,
    /// Report format: text or json
    #[arg(short, long, default_value = "text")]
    format: String,
    /// Write logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rollgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Returns whether every endpoint ended up upgraded.
async fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = RolloutConfig::from_file(&cli.config)?;
    let digest = config.source_digest().map_err(|e| {
        anyhow::anyhow!("cannot read binary {}: {e}", config.src.display())
    })?;
    info!(
        src = %config.src.display(),
        sha256 = %digest,
        backends = config.backends.len(),
        "loaded rollout config"
    );

    let collaborators = Collaborators {
        lb: Arc::new(HttpLoadBalancer::new(&config.lb)),
        exec: rollgrid_exec::from_transport(&config.transport),
        health: Arc::new(HttpHealthProbe::new(&config.health_path)),
    };

    let (ctx, cancel) = RunContext::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping rollout");
            cancel.cancel();
        }
    });

    let outcome = deploy::deploy(config, collaborators, &ctx).await?;

    match cli.format.as_str() {
        "json" => {
            let report = report::Report::from_outcome(&outcome);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print!("{}", report::format_report(&outcome)),
    }

    Ok(outcome.is_clean())
}
