//! One endpoint's upgrade as a resumable state machine.
//!
//! An action walks the stages in order. When a stage fails the action
//! remembers it, and the next `run` starts there instead of at the top, so
//! a retry never drains or replaces an endpoint twice.

use std::sync::Arc;
use std::time::Duration;

use rollgrid_config::{Backend, ConfigError, ConfigResult, RolloutConfig};
use rollgrid_exec::{RemoteExec, Signal};
use rollgrid_health::{HealthProbe, ProbeResult};
use rollgrid_lb::LoadBalancer;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::ActionError;
use crate::stage::Stage;

/// Permissions of the copied binary.
pub const BINARY_MODE: u32 = 0o770;

/// The outside systems an action talks to. Shared by every action.
#[derive(Clone)]
pub struct Collaborators {
    pub lb: Arc<dyn LoadBalancer>,
    pub exec: Arc<dyn RemoteExec>,
    pub health: Arc<dyn HealthProbe>,
}

/// Bounds of the waiting loops inside a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    /// How long a binary gets to exit after SIGTERM.
    pub term_wait: Duration,
    /// How long a binary gets to exit after SIGKILL.
    pub kill_wait: Duration,
    /// How long a started binary gets to report healthy.
    pub health_window: Duration,
    pub poll_interval: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            term_wait: Duration::from_secs(30),
            kill_wait: Duration::from_secs(10),
            health_window: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct Action {
    endpoint: String,
    backend: Backend,
    config: Arc<RolloutConfig>,
    collaborators: Collaborators,
    timeouts: StageTimeouts,
    started: bool,
    current_stage: Stage,
    failed_stage: Option<Stage>,
    err: Option<Arc<ActionError>>,
}

impl Action {
    pub fn new(
        endpoint: &str,
        config: Arc<RolloutConfig>,
        collaborators: Collaborators,
        timeouts: StageTimeouts,
    ) -> ConfigResult<Self> {
        let backend = endpoint
            .parse::<Backend>()
            .map_err(|e| ConfigError::Backend {
                addr: endpoint.to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            backend,
            config,
            collaborators,
            timeouts,
            started: false,
            current_stage: Stage::INITIAL,
            failed_stage: None,
            err: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Whether `run` was ever entered.
    pub fn started(&self) -> bool {
        self.started
    }

    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failed_stage
    }

    /// Error of the latest run, if it failed.
    pub fn err(&self) -> Option<&Arc<ActionError>> {
        self.err.as_ref()
    }

    /// Name of the stage that failed, or `""`.
    pub fn failure(&self) -> &'static str {
        self.failed_stage.map(Stage::name).unwrap_or("")
    }

    /// Upgrade the endpoint, resuming at the stage that failed last time.
    ///
    /// The context is checked before every stage. Stopping there records
    /// the stage that was about to run.
    pub async fn run(&mut self, ctx: &RunContext) -> Result<(), Arc<ActionError>> {
        let mut source = match std::fs::File::open(&self.config.src) {
            Ok(file) => tokio::fs::File::from_std(file),
            Err(source) => {
                let err = Arc::new(ActionError::OpenSource {
                    path: self.config.src.clone(),
                    source,
                });
                self.err = Some(Arc::clone(&err));
                return Err(err);
            }
        };

        self.started = true;
        let mut stage = self.failed_stage.unwrap_or(Stage::INITIAL);
        if stage != Stage::INITIAL {
            info!(endpoint = %self.endpoint, %stage, "resuming upgrade");
        }

        loop {
            self.current_stage = stage;
            if stage.is_done() {
                self.err = None;
                info!(endpoint = %self.endpoint, "upgrade complete");
                return Ok(());
            }

            let result = match ctx.err() {
                Some(err) => Err(ActionError::from(err)),
                None => {
                    debug!(endpoint = %self.endpoint, %stage, "running stage");
                    self.run_stage(stage, ctx, &mut source).await
                }
            };

            if let Err(err) = result {
                warn!(endpoint = %self.endpoint, %stage, error = %err, "stage failed");
                let err = Arc::new(err);
                self.failed_stage = Some(stage);
                self.err = Some(Arc::clone(&err));
                return Err(err);
            }
            stage = stage.next();
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &RunContext,
        source: &mut tokio::fs::File,
    ) -> Result<(), ActionError> {
        match stage {
            Stage::RemoveFromPool => self.remove_from_pool(ctx).await,
            Stage::KillExisting => self.kill_existing(ctx).await,
            Stage::CopyBinary => self.copy_binary(ctx, source).await,
            Stage::StartBinary => self.start_binary(ctx).await,
            Stage::WaitHealthy => self.wait_healthy(ctx).await,
            Stage::AddToPool => self.add_to_pool(ctx).await,
            Stage::Done => Ok(()),
        }
    }

    async fn remove_from_pool(&self, ctx: &RunContext) -> Result<(), ActionError> {
        let lb = &self.collaborators.lb;
        ctx.scope(lb.remove_backend(&self.config.pattern, self.backend))
            .await?
            .map_err(ActionError::RemoveBackend)?;
        info!(endpoint = %self.endpoint, pattern = %self.config.pattern, "removed from pool");
        Ok(())
    }

    async fn add_to_pool(&self, ctx: &RunContext) -> Result<(), ActionError> {
        let lb = &self.collaborators.lb;
        ctx.scope(lb.add_backend(&self.config.pattern, self.backend))
            .await?
            .map_err(ActionError::AddBackend)?;
        info!(endpoint = %self.endpoint, pattern = %self.config.pattern, "added to pool");
        Ok(())
    }

    async fn kill_existing(&self, ctx: &RunContext) -> Result<(), ActionError> {
        let pids = self.find_pids(ctx).await?;
        if pids.is_empty() {
            debug!(endpoint = %self.endpoint, "no running binary");
            return Ok(());
        }

        self.signal(ctx, Signal::Term, &pids).await?;
        let survivors = self.wait_for_exit(ctx, self.timeouts.term_wait).await?;
        if survivors.is_empty() {
            return Ok(());
        }

        warn!(
            endpoint = %self.endpoint,
            pids = ?survivors,
            waited = ?self.timeouts.term_wait,
            "binary ignored SIGTERM, sending SIGKILL"
        );
        self.signal(ctx, Signal::Kill, &survivors).await?;
        let survivors = self.wait_for_exit(ctx, self.timeouts.kill_wait).await?;
        if !survivors.is_empty() {
            return Err(ActionError::StillRunning {
                pids: survivors,
                waited: self.timeouts.kill_wait,
            });
        }
        Ok(())
    }

    /// PIDs of the running binary. Only a missing lookup tool is an error;
    /// any other lookup failure reads as "not running".
    async fn find_pids(&self, ctx: &RunContext) -> Result<Vec<u32>, ActionError> {
        let name = self.config.process_name(self.backend.port);
        let exec = &self.collaborators.exec;
        match ctx.scope(exec.find_process(self.backend.ip, &name)).await? {
            Ok(pids) => Ok(pids),
            Err(e) if e.is_command_not_found() => Err(ActionError::FindPids(e)),
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "process lookup failed, treating as not running");
                Ok(Vec::new())
            }
        }
    }

    async fn signal(&self, ctx: &RunContext, signal: Signal, pids: &[u32]) -> Result<(), ActionError> {
        let exec = &self.collaborators.exec;
        for &pid in pids {
            let command = signal.kill_command(pid);
            if let Err(source) = ctx.scope(exec.run(self.backend.ip, &command)).await? {
                // The process may have exited between the last lookup and the kill.
                if !self.find_pids(ctx).await?.contains(&pid) {
                    debug!(endpoint = %self.endpoint, pid, %signal, "process already gone");
                    continue;
                }
                return Err(ActionError::Signal {
                    signal,
                    pid,
                    source,
                });
            }
            debug!(endpoint = %self.endpoint, pid, %signal, "signal sent");
        }
        Ok(())
    }

    /// Poll until the binary is gone or `wait` runs out. Returns the PIDs
    /// still running.
    async fn wait_for_exit(&self, ctx: &RunContext, wait: Duration) -> Result<Vec<u32>, ActionError> {
        let deadline = Instant::now() + wait;
        loop {
            let pids = self.find_pids(ctx).await?;
            if pids.is_empty() || Instant::now() >= deadline {
                return Ok(pids);
            }
            ctx.sleep(self.timeouts.poll_interval).await?;
        }
    }

    async fn copy_binary(&self, ctx: &RunContext, source: &mut tokio::fs::File) -> Result<(), ActionError> {
        let dst = self.config.destination(self.backend.port);
        let exec = &self.collaborators.exec;
        let written = ctx
            .scope(exec.copy_file(self.backend.ip, source, &dst, BINARY_MODE))
            .await?
            .map_err(|source| ActionError::Copy {
                dst: dst.clone(),
                source,
            })?;
        info!(endpoint = %self.endpoint, %dst, bytes = written, "binary copied");
        Ok(())
    }

    async fn start_binary(&self, ctx: &RunContext) -> Result<(), ActionError> {
        let dst = self.config.destination(self.backend.port);
        let args = self.config.start_args(self.backend.port);
        let exec = &self.collaborators.exec;
        ctx.scope(exec.start_detached(self.backend.ip, &dst, &args))
            .await?
            .map_err(ActionError::Start)?;
        info!(endpoint = %self.endpoint, %dst, ?args, "binary started");
        Ok(())
    }

    async fn wait_healthy(&self, ctx: &RunContext) -> Result<(), ActionError> {
        let window = self.timeouts.health_window;
        let deadline = Instant::now() + window;
        loop {
            let probe = tokio::time::timeout_at(deadline, self.collaborators.health.probe(&self.endpoint));
            match ctx.scope(probe).await? {
                Ok(ProbeResult::Healthy) => {
                    info!(endpoint = %self.endpoint, "endpoint healthy");
                    return Ok(());
                }
                Ok(result) => debug!(endpoint = %self.endpoint, ?result, "not healthy yet"),
                Err(_) => debug!(endpoint = %self.endpoint, "health probe outlasted the window"),
            }

            if Instant::now() >= deadline {
                return Err(ActionError::Unhealthy {
                    endpoint: self.endpoint.clone(),
                    window,
                });
            }
            ctx.sleep(self.timeouts.poll_interval).await?;
        }
    }
}
