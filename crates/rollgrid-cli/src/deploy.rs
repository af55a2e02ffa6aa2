use anyhow::Context;
use rollgrid_config::RolloutConfig;
use rollgrid_lb::{HealthChecks, LoadBalancer, PoolType};
use rollgrid_rollout::{Collaborators, RolloutError, RunContext, Workflow, WorkflowStatus};
use tracing::{debug, info, warn};

/// What a deploy left behind.
#[derive(Debug)]
pub struct Outcome {
    pub status: WorkflowStatus,
    /// Why the rollout or its retries stopped short.
    pub error: Option<RolloutError>,
}

impl Outcome {
    /// Every endpoint ended up on the new binary.
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.status.failures.is_empty()
    }
}

/// Create the pool if the load balancer does not know it yet.
pub async fn ensure_pool(lb: &dyn LoadBalancer, config: &RolloutConfig) -> anyhow::Result<()> {
    match lb.pool_health(&config.pattern).await {
        Ok(health) => {
            debug!(pattern = %config.pattern, status = %health.status, "pool exists");
            Ok(())
        }
        Err(e) => {
            info!(pattern = %config.pattern, error = %e, "pool not found, creating it");
            let checks = HealthChecks::healthz(&config.health_path);
            lb.add_pool(&config.pattern, PoolType::P2c, &checks)
                .await
                .with_context(|| format!("could not create pool {}", config.pattern))
        }
    }
}

/// Run the rollout, then retry failed endpoints until clean or out of
/// passes.
pub async fn deploy(
    config: RolloutConfig,
    collaborators: Collaborators,
    ctx: &RunContext,
) -> anyhow::Result<Outcome> {
    ensure_pool(collaborators.lb.as_ref(), &config).await?;

    let passes = config.retry_passes;
    let delay = config.retry_delay();
    let mut workflow = Workflow::new(config, collaborators)?;

    if let Err(e) = workflow.run(ctx).await {
        return Ok(Outcome {
            status: workflow.status().await,
            error: Some(e),
        });
    }

    let status = workflow.status().await;
    if !status.failures.is_empty() {
        warn!(
            failures = status.failures.len(),
            passes,
            "rollout finished with failed endpoints, retrying"
        );
    }
    let error = workflow.retry_until_clean(ctx, passes, delay).await.err();

    Ok(Outcome {
        status: workflow.status().await,
        error,
    })
}
