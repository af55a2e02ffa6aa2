//! Workflow controller: drives a rollout across every backend.
//!
//! The controller checks the load balancer's view of the pool, upgrades
//! the canaries one by one, then upgrades the rest under a concurrency
//! cap until the failure budget is spent.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rollgrid_config::{Backend, RolloutConfig};
use rollgrid_lb::PoolStatus;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::action::{Action, Collaborators, StageTimeouts};
use crate::context::RunContext;
use crate::error::{ActionError, PreconditionError, RolloutError, RolloutResult};
use crate::stage::Stage;

/// How a workflow run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndState {
    /// Not run yet.
    Unknown,
    /// Every action was attempted without exhausting the failure budget.
    /// Some endpoints may still have failed.
    Success,
    /// The pool did not match the config. Nothing was touched.
    PreconditionFailure,
    /// A canary failed. No further actions ran.
    CanaryFailure,
    /// The failure budget ran out and admissions stopped.
    MaxFailuresExceeded,
}

impl fmt::Display for EndState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Success => "Success",
            Self::PreconditionFailure => "PreconditionFailure",
            Self::CanaryFailure => "CanaryFailure",
            Self::MaxFailuresExceeded => "MaxFailuresExceeded",
        };
        f.write_str(name)
    }
}

/// An endpoint whose latest upgrade attempt failed.
#[derive(Debug, Clone)]
pub struct FailedAction {
    /// Position in the configured backend list.
    pub index: usize,
    pub endpoint: String,
    pub backend: Backend,
    /// `None` when the failure happened before any stage ran.
    pub stage: Option<Stage>,
    pub error: Arc<ActionError>,
}

impl FailedAction {
    /// Name of the failed stage, or `""`.
    pub fn failure(&self) -> &'static str {
        self.stage.map(Stage::name).unwrap_or("")
    }
}

/// Snapshot of a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowStatus {
    pub end_state: EndState,
    pub failures: Vec<FailedAction>,
}

/// Snapshot of one action.
#[derive(Debug, Clone)]
pub struct ActionSnapshot {
    pub endpoint: String,
    pub started: bool,
    pub current_stage: Stage,
    pub failed_stage: Option<Stage>,
    pub error: Option<Arc<ActionError>>,
}

pub struct Workflow {
    config: Arc<RolloutConfig>,
    collaborators: Collaborators,
    backends: Vec<Backend>,
    actions: Vec<Arc<Mutex<Action>>>,
    failures: Arc<AtomicU32>,
    end_state: EndState,
    bulk_admitted: usize,
}

impl Workflow {
    pub fn new(config: RolloutConfig, collaborators: Collaborators) -> RolloutResult<Self> {
        Self::with_stage_timeouts(config, collaborators, StageTimeouts::default())
    }

    pub fn with_stage_timeouts(
        config: RolloutConfig,
        collaborators: Collaborators,
        timeouts: StageTimeouts,
    ) -> RolloutResult<Self> {
        config.validate()?;
        let backends = config.backend_set()?;
        let config = Arc::new(config);
        let actions = build_actions(&config, &collaborators, timeouts)?;

        Ok(Self {
            config,
            collaborators,
            backends,
            actions,
            failures: Arc::new(AtomicU32::new(0)),
            end_state: EndState::Unknown,
            bulk_admitted: 0,
        })
    }

    pub fn end_state(&self) -> EndState {
        self.end_state
    }

    /// Failures currently counted against the budget.
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Actions started by the bulk phase.
    pub fn bulk_admitted(&self) -> usize {
        self.bulk_admitted
    }

    /// Run the rollout once.
    ///
    /// # Panics
    ///
    /// If the workflow already ran.
    pub async fn run(&mut self, ctx: &RunContext) -> RolloutResult<()> {
        assert_eq!(
            self.end_state,
            EndState::Unknown,
            "a workflow can only be run once"
        );

        info!(
            pattern = %self.config.pattern,
            backends = self.actions.len(),
            canaries = self.config.canary_num,
            concurrency = self.config.concurrency,
            max_failures = self.config.max_failures,
            "starting rollout"
        );

        let precondition_ctx = ctx.with_timeout(self.config.precondition_timeout());
        if let Err(e) = self.check_lb_state(&precondition_ctx).await {
            self.end_state = EndState::PreconditionFailure;
            error!(error = %e, "load balancer precondition failed");
            return Err(e.into());
        }

        let canaries = self.config.canary_num.min(self.actions.len());
        self.run_canaries(ctx, canaries).await?;
        self.run_bulk(ctx, canaries).await
    }

    async fn check_lb_state(&self, ctx: &RunContext) -> Result<(), PreconditionError> {
        let pattern = &self.config.pattern;
        let health = ctx
            .scope(self.collaborators.lb.pool_health(pattern))
            .await
            .map_err(|source| PreconditionError::Context {
                pattern: pattern.clone(),
                source,
            })?
            .map_err(|source| PreconditionError::PoolHealth {
                pattern: pattern.clone(),
                source,
            })?;

        match health.status {
            PoolStatus::Empty => {
                if !self.backends.is_empty() {
                    return Err(PreconditionError::EmptyPool {
                        configured: self.backends.len(),
                    });
                }
            }
            PoolStatus::Full => {
                let configured: HashSet<Backend> = self.backends.iter().copied().collect();
                let reported: HashSet<Backend> = health.backends.iter().copied().collect();
                if let Some(extra) = health.backends.iter().find(|b| !configured.contains(*b)) {
                    return Err(PreconditionError::UnexpectedBackend(*extra));
                }
                if let Some(missing) = self.backends.iter().find(|b| !reported.contains(*b)) {
                    return Err(PreconditionError::MissingBackend(*missing));
                }
            }
            other => return Err(PreconditionError::PoolNotHealthy(other)),
        }

        info!(%pattern, status = %health.status, "pool matches config");
        Ok(())
    }

    async fn run_canaries(&mut self, ctx: &RunContext, canaries: usize) -> RolloutResult<()> {
        for action in &self.actions[..canaries] {
            let mut action = action.lock().await;
            info!(endpoint = %action.endpoint(), "running canary");

            let action_ctx = ctx.with_timeout(self.config.action_timeout());
            if let Err(source) = action.run(&action_ctx).await {
                self.end_state = EndState::CanaryFailure;
                error!(
                    endpoint = %action.endpoint(),
                    stage = action.failure(),
                    error = %source,
                    "canary failed, stopping rollout"
                );
                return Err(RolloutError::Canary {
                    endpoint: action.endpoint().to_string(),
                    source,
                });
            }
        }

        if canaries > 0 {
            let cooldown = self.config.canary_cooldown();
            info!(?cooldown, "canaries passed, cooling down");
            // A stopped context surfaces through the bulk actions instead.
            let _ = ctx.sleep(cooldown).await;
        }
        Ok(())
    }

    async fn run_bulk(&mut self, ctx: &RunContext, canaries: usize) -> RolloutResult<()> {
        let max = self.config.max_failures;
        // Never more permits than endpoints left to upgrade.
        let cap = self.config.concurrency.min(self.actions.len() - canaries);
        let semaphore = Arc::new(Semaphore::new(cap));
        let mut tasks = JoinSet::new();

        for action in &self.actions[canaries..] {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .expect("rollout semaphore is never closed");

            let failures = self.failures.load(Ordering::SeqCst);
            if failures > max {
                warn!(failures, max, "failure budget exhausted, no more endpoints will be started");
                break;
            }

            self.bulk_admitted += 1;
            let action = Arc::clone(action);
            let failures = Arc::clone(&self.failures);
            let action_ctx = ctx.with_timeout(self.config.action_timeout());
            tasks.spawn(async move {
                let _permit = permit;
                let mut action = action.lock().await;
                if let Err(e) = action.run(&action_ctx).await {
                    warn!(
                        endpoint = %action.endpoint(),
                        stage = action.failure(),
                        error = %e,
                        "endpoint upgrade failed"
                    );
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "upgrade task panicked");
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }

        let failures = self.failures.load(Ordering::SeqCst);
        if failures > max {
            self.end_state = EndState::MaxFailuresExceeded;
            error!(failures, max, "rollout stopped after too many failures");
            return Err(RolloutError::MaxFailuresExceeded { failures, max });
        }

        self.end_state = EndState::Success;
        info!(failures, "rollout finished");
        Ok(())
    }

    /// End state plus every action whose latest attempt failed.
    pub async fn status(&self) -> WorkflowStatus {
        let mut failures = Vec::new();
        for (index, action) in self.actions.iter().enumerate() {
            let action = action.lock().await;
            if let Some(error) = action.err() {
                failures.push(FailedAction {
                    index,
                    endpoint: action.endpoint().to_string(),
                    backend: action.backend(),
                    stage: action.failed_stage(),
                    error: Arc::clone(error),
                });
            }
        }
        WorkflowStatus {
            end_state: self.end_state,
            failures,
        }
    }

    /// State of every action, in backend order.
    pub async fn actions(&self) -> Vec<ActionSnapshot> {
        let mut snapshots = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            let action = action.lock().await;
            snapshots.push(ActionSnapshot {
                endpoint: action.endpoint().to_string(),
                started: action.started(),
                current_stage: action.current_stage(),
                failed_stage: action.failed_stage(),
                error: action.err().cloned(),
            });
        }
        snapshots
    }

    /// Rerun every failed action, each from the stage it failed at.
    ///
    /// # Panics
    ///
    /// Unless the run ended in `EndState::Success`.
    pub async fn retry_failed(&self, ctx: &RunContext) {
        assert_eq!(
            self.end_state,
            EndState::Success,
            "retry_failed called on a workflow that did not succeed"
        );

        let status = self.status().await;
        // Not capped by Concurrency: every failed action retries at once.
        let mut tasks = JoinSet::new();
        for failed in status.failures {
            let action = Arc::clone(&self.actions[failed.index]);
            let failures = Arc::clone(&self.failures);
            let action_ctx = ctx.with_timeout(self.config.action_timeout());
            tasks.spawn(async move {
                let mut action = action.lock().await;
                match action.run(&action_ctx).await {
                    Ok(()) => {
                        let _ = failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            n.checked_sub(1)
                        });
                        info!(endpoint = %action.endpoint(), "retry succeeded");
                    }
                    Err(e) => warn!(
                        endpoint = %action.endpoint(),
                        stage = action.failure(),
                        error = %e,
                        "retry failed"
                    ),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "retry task panicked");
            }
        }
    }

    /// Retry failed actions up to `passes` times, waiting `delay` before
    /// each pass.
    ///
    /// # Panics
    ///
    /// Unless the run ended in `EndState::Success`.
    pub async fn retry_until_clean(
        &self,
        ctx: &RunContext,
        passes: u32,
        delay: Duration,
    ) -> RolloutResult<()> {
        assert_eq!(
            self.end_state,
            EndState::Success,
            "retry_until_clean called on a workflow that did not succeed"
        );

        for pass in 1..=passes {
            let remaining = self.status().await.failures.len();
            if remaining == 0 {
                return Ok(());
            }
            info!(pass, passes, remaining, ?delay, "retrying failed endpoints");
            ctx.sleep(delay).await?;
            self.retry_failed(ctx).await;
        }

        let remaining = self.status().await.failures.len();
        if remaining > 0 {
            return Err(RolloutError::RetryExhausted { remaining, passes });
        }
        Ok(())
    }
}

fn build_actions(
    config: &Arc<RolloutConfig>,
    collaborators: &Collaborators,
    timeouts: StageTimeouts,
) -> RolloutResult<Vec<Arc<Mutex<Action>>>> {
    config
        .backends
        .iter()
        .map(|endpoint| {
            let action = Action::new(
                endpoint,
                Arc::clone(config),
                collaborators.clone(),
                timeouts,
            )?;
            Ok(Arc::new(Mutex::new(action)))
        })
        .collect()
}
