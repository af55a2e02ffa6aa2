//! Scripted collaborators shared by the rollout tests.
//!
//! All three stubs write to one `CallLog`, so a test can check the order
//! of load balancer, exec, and probe calls across endpoints.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rollgrid_config::{Backend, RolloutConfig, Transport};
use rollgrid_exec::{ExecError, ExecFuture, RemoteExec, SourceReader};
use rollgrid_health::{HealthProbe, ProbeFuture, ProbeResult};
use rollgrid_lb::{
    HealthChecks, LbError, LbFuture, LoadBalancer, MemoryLoadBalancer, PoolHealth, PoolType,
};
use tokio::io::AsyncReadExt;
use tokio::sync::Barrier;
use tokio::time::Instant;

use crate::action::Collaborators;

pub(crate) const PATTERN: &str = "/";
pub(crate) const BINARY: &[u8] = b"#!/bin/sh\necho new build\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Remove(Backend),
    Add(Backend),
    Find(IpAddr),
    Signal(IpAddr, String),
    Copy { host: IpAddr, dst: String, bytes: usize },
    Start { host: IpAddr, program: String, args: Vec<String> },
    Probe(String),
}

#[derive(Default)]
pub(crate) struct CallLog {
    calls: Mutex<Vec<(Instant, Call)>>,
}

impl CallLog {
    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, c)| pred(c)).count()
    }

    /// When the first call matching `pred` happened.
    pub(crate) fn first_at(&self, pred: impl Fn(&Call) -> bool) -> Option<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(_, c)| pred(c))
            .map(|(at, _)| *at)
    }

    /// When the last call matching `pred` happened.
    pub(crate) fn last_at(&self, pred: impl Fn(&Call) -> bool) -> Option<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, c)| pred(c))
            .map(|(at, _)| *at)
    }
}

pub(crate) fn backend(addr: &str) -> Backend {
    addr.parse().unwrap()
}

fn host(addr: &str) -> IpAddr {
    backend(addr).ip
}

/// Wraps a `MemoryLoadBalancer`, recording calls and injecting removal
/// failures. Tracks how many endpoints are out of the pool at once.
pub(crate) struct StubLb {
    pool: MemoryLoadBalancer,
    log: Arc<CallLog>,
    failing_remove: Mutex<HashSet<Backend>>,
    gate: Mutex<Option<Arc<Barrier>>>,
    out_of_pool: AtomicUsize,
    max_out_of_pool: AtomicUsize,
}

impl StubLb {
    pub(crate) fn pool(&self) -> &MemoryLoadBalancer {
        &self.pool
    }

    pub(crate) fn fail_remove(&self, addr: &str) {
        self.failing_remove.lock().unwrap().insert(backend(addr));
    }

    /// Failing removals wait until `parties` of them have arrived.
    pub(crate) fn gate_failures(&self, parties: usize) {
        *self.gate.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }

    pub(crate) fn max_out_of_pool(&self) -> usize {
        self.max_out_of_pool.load(Ordering::SeqCst)
    }
}

impl LoadBalancer for StubLb {
    fn pool_health<'a>(&'a self, pattern: &'a str) -> LbFuture<'a, PoolHealth> {
        self.pool.pool_health(pattern)
    }

    fn add_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()> {
        Box::pin(async move {
            self.log.push(Call::Add(backend));
            self.pool.add_backend(pattern, backend).await?;
            let _ = self
                .out_of_pool
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            Ok(())
        })
    }

    fn remove_backend<'a>(&'a self, pattern: &'a str, backend: Backend) -> LbFuture<'a, ()> {
        Box::pin(async move {
            self.log.push(Call::Remove(backend));
            let failing = self.failing_remove.lock().unwrap().contains(&backend);
            if failing {
                let gate = self.gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.wait().await;
                }
                return Err(LbError::Connect {
                    addr: "stub".to_string(),
                    reason: format!("injected failure removing {backend}"),
                });
            }
            self.pool.remove_backend(pattern, backend).await?;
            let now = self.out_of_pool.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_out_of_pool.fetch_max(now, Ordering::SeqCst);
            Ok(())
        })
    }

    fn add_pool<'a>(
        &'a self,
        pattern: &'a str,
        pool_type: PoolType,
        health_checks: &'a HealthChecks,
    ) -> LbFuture<'a, ()> {
        self.pool.add_pool(pattern, pool_type, health_checks)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum LookupFailure {
    /// `pidof` is not installed.
    Missing,
    /// The host could not be reached.
    Unreachable,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SignalFailure {
    /// The process exits on its own just before `kill` reaches it.
    Vanished,
    /// `kill` is refused and the process keeps running.
    Denied,
}

/// Simulates one running binary per host and the process tooling around it.
pub(crate) struct StubExec {
    log: Arc<CallLog>,
    running: Mutex<HashMap<IpAddr, Vec<u32>>>,
    ignores_term: Mutex<HashSet<IpAddr>>,
    unkillable: Mutex<HashSet<IpAddr>>,
    lookup_failures: Mutex<HashMap<IpAddr, LookupFailure>>,
    signal_failures: Mutex<HashMap<IpAddr, SignalFailure>>,
    failing_copy: Mutex<HashSet<IpAddr>>,
    failing_start: Mutex<HashSet<IpAddr>>,
    start_delay: Mutex<Duration>,
    next_pid: AtomicU32,
}

impl StubExec {
    pub(crate) fn running(&self, addr: &str) -> Vec<u32> {
        let running = self.running.lock().unwrap();
        running.get(&host(addr)).cloned().unwrap_or_default()
    }

    pub(crate) fn stop_all(&self, addr: &str) {
        self.running.lock().unwrap().remove(&host(addr));
    }

    pub(crate) fn ignore_term(&self, addr: &str) {
        self.ignores_term.lock().unwrap().insert(host(addr));
    }

    pub(crate) fn make_unkillable(&self, addr: &str) {
        self.unkillable.lock().unwrap().insert(host(addr));
    }

    pub(crate) fn fail_lookup(&self, addr: &str, failure: LookupFailure) {
        self.lookup_failures.lock().unwrap().insert(host(addr), failure);
    }

    pub(crate) fn fail_signal(&self, addr: &str, failure: SignalFailure) {
        self.signal_failures.lock().unwrap().insert(host(addr), failure);
    }

    pub(crate) fn fail_copy(&self, addr: &str) {
        self.failing_copy.lock().unwrap().insert(host(addr));
    }

    pub(crate) fn fail_start(&self, addr: &str) {
        self.failing_start.lock().unwrap().insert(host(addr));
    }

    /// Make every start take `delay`, so upgrades overlap in time.
    pub(crate) fn slow_start(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    fn deliver(&self, host: IpAddr, command: &str) -> Result<(), ExecError> {
        let mut parts = command.split_whitespace().skip(1);
        let (Some(signal), Some(pid)) = (parts.next(), parts.next()) else {
            return Ok(());
        };
        let Ok(pid) = pid.parse::<u32>() else {
            return Ok(());
        };
        let failure = self.signal_failures.lock().unwrap().get(&host).copied();
        match failure {
            Some(SignalFailure::Vanished) => {
                if let Some(pids) = self.running.lock().unwrap().get_mut(&host) {
                    pids.retain(|p| *p != pid);
                }
                return Err(ExecError::NonZeroExit {
                    command: command.to_string(),
                    code: 1,
                    stderr: format!("kill: ({pid}) - No such process"),
                });
            }
            Some(SignalFailure::Denied) => {
                return Err(ExecError::NonZeroExit {
                    command: command.to_string(),
                    code: 1,
                    stderr: format!("kill: ({pid}) - Operation not permitted"),
                });
            }
            None => {}
        }
        if self.unkillable.lock().unwrap().contains(&host) {
            return Ok(());
        }
        if signal == "-TERM" && self.ignores_term.lock().unwrap().contains(&host) {
            return Ok(());
        }
        if let Some(pids) = self.running.lock().unwrap().get_mut(&host) {
            pids.retain(|p| *p != pid);
        }
        Ok(())
    }
}

impl RemoteExec for StubExec {
    fn run<'a>(&'a self, host: IpAddr, command: &'a str) -> ExecFuture<'a, String> {
        Box::pin(async move {
            if command.starts_with("kill ") {
                self.log.push(Call::Signal(host, command.to_string()));
                self.deliver(host, command)?;
            }
            Ok(String::new())
        })
    }

    fn start_detached<'a>(
        &'a self,
        host: IpAddr,
        program: &'a str,
        args: &'a [String],
    ) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            self.log.push(Call::Start {
                host,
                program: program.to_string(),
                args: args.to_vec(),
            });
            let failing = self.failing_start.lock().unwrap().contains(&host);
            if failing {
                return Err(ExecError::CommandNotFound {
                    command: program.to_string(),
                });
            }
            let delay = *self.start_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            self.running.lock().unwrap().entry(host).or_default().push(pid);
            Ok(())
        })
    }

    fn copy_file<'a>(
        &'a self,
        host: IpAddr,
        src: SourceReader<'a>,
        dst: &'a str,
        _mode: u32,
    ) -> ExecFuture<'a, u64> {
        Box::pin(async move {
            let failing = self.failing_copy.lock().unwrap().contains(&host);
            if failing {
                self.log.push(Call::Copy {
                    host,
                    dst: dst.to_string(),
                    bytes: 0,
                });
                return Err(ExecError::NonZeroExit {
                    command: format!("cat > {dst}"),
                    code: 1,
                    stderr: "No space left on device".to_string(),
                });
            }
            let mut buf = Vec::new();
            src.read_to_end(&mut buf).await?;
            self.log.push(Call::Copy {
                host,
                dst: dst.to_string(),
                bytes: buf.len(),
            });
            Ok(buf.len() as u64)
        })
    }

    fn find_process<'a>(&'a self, host: IpAddr, name: &'a str) -> ExecFuture<'a, Vec<u32>> {
        Box::pin(async move {
            self.log.push(Call::Find(host));
            let failure = self.lookup_failures.lock().unwrap().get(&host).copied();
            match failure {
                Some(LookupFailure::Missing) => {
                    return Err(ExecError::CommandNotFound {
                        command: format!("pidof {name}"),
                    });
                }
                Some(LookupFailure::Unreachable) => {
                    return Err(ExecError::Transport {
                        host: host.to_string(),
                        reason: "connection timed out".to_string(),
                    });
                }
                None => {}
            }
            let pids = self
                .running
                .lock()
                .unwrap()
                .get(&host)
                .cloned()
                .unwrap_or_default();
            if pids.is_empty() {
                // pidof exits 1 when nothing matches.
                return Err(ExecError::NonZeroExit {
                    command: format!("pidof {name}"),
                    code: 1,
                    stderr: String::new(),
                });
            }
            Ok(pids)
        })
    }
}

/// Healthy unless told otherwise.
pub(crate) struct StubHealth {
    log: Arc<CallLog>,
    unhealthy: Mutex<HashSet<String>>,
    unreachable_probes: Mutex<HashMap<String, u32>>,
}

impl StubHealth {
    pub(crate) fn set_unhealthy(&self, endpoint: &str) {
        self.unhealthy.lock().unwrap().insert(endpoint.to_string());
    }

    pub(crate) fn set_healthy(&self, endpoint: &str) {
        self.unhealthy.lock().unwrap().remove(endpoint);
    }

    /// The next `probes` probes of `endpoint` fail to connect.
    pub(crate) fn refuse(&self, endpoint: &str, probes: u32) {
        self.unreachable_probes
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), probes);
    }
}

impl HealthProbe for StubHealth {
    fn probe<'a>(&'a self, endpoint: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move {
            self.log.push(Call::Probe(endpoint.to_string()));
            {
                let mut refused = self.unreachable_probes.lock().unwrap();
                if let Some(left) = refused.get_mut(endpoint) {
                    if *left > 0 {
                        *left -= 1;
                        return ProbeResult::Failed;
                    }
                }
            }
            if self.unhealthy.lock().unwrap().contains(endpoint) {
                ProbeResult::Unhealthy
            } else {
                ProbeResult::Healthy
            }
        })
    }
}

/// A full pool of `backends`, each running an old binary, plus the binary
/// to roll out.
pub(crate) struct Harness {
    pub(crate) log: Arc<CallLog>,
    pub(crate) lb: Arc<StubLb>,
    pub(crate) exec: Arc<StubExec>,
    pub(crate) health: Arc<StubHealth>,
    backends: Vec<String>,
    src: tempfile::NamedTempFile,
}

impl Harness {
    pub(crate) fn new(backends: &[&str]) -> Self {
        let log = Arc::new(CallLog::default());
        let parsed: Vec<Backend> = backends.iter().map(|b| backend(b)).collect();

        let lb = Arc::new(StubLb {
            pool: MemoryLoadBalancer::new().with_pool(PATTERN, &parsed),
            log: Arc::clone(&log),
            failing_remove: Mutex::default(),
            gate: Mutex::default(),
            out_of_pool: AtomicUsize::new(0),
            max_out_of_pool: AtomicUsize::new(0),
        });

        let running = parsed
            .iter()
            .enumerate()
            .map(|(i, b)| (b.ip, vec![100 + i as u32]))
            .collect();
        let exec = Arc::new(StubExec {
            log: Arc::clone(&log),
            running: Mutex::new(running),
            ignores_term: Mutex::default(),
            unkillable: Mutex::default(),
            lookup_failures: Mutex::default(),
            signal_failures: Mutex::default(),
            failing_copy: Mutex::default(),
            failing_start: Mutex::default(),
            start_delay: Mutex::new(Duration::ZERO),
            next_pid: AtomicU32::new(1000),
        });

        let health = Arc::new(StubHealth {
            log: Arc::clone(&log),
            unhealthy: Mutex::default(),
            unreachable_probes: Mutex::default(),
        });

        let mut src = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut src, BINARY).unwrap();

        Self {
            log,
            lb,
            exec,
            health,
            backends: backends.iter().map(|b| b.to_string()).collect(),
            src,
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            lb: Arc::clone(&self.lb) as Arc<dyn LoadBalancer>,
            exec: Arc::clone(&self.exec) as Arc<dyn RemoteExec>,
            health: Arc::clone(&self.health) as Arc<dyn HealthProbe>,
        }
    }

    /// Config covering every backend: one at a time, no canaries, no
    /// failure budget, no cooldown.
    pub(crate) fn config(&self) -> RolloutConfig {
        RolloutConfig {
            concurrency: 1,
            canary_num: 0,
            max_failures: 0,
            src: self.src.path().to_path_buf(),
            lb: "127.0.0.1:8000".to_string(),
            pattern: PATTERN.to_string(),
            backends: self.backends.clone(),
            dst: Some("/opt/web/web".to_string()),
            args: vec!["--port={port}".to_string()],
            health_path: "/healthz".to_string(),
            transport: Transport::Local,
            precondition_timeout_secs: 30,
            action_timeout_secs: 600,
            canary_cooldown_secs: 0,
            retry_passes: 3,
            retry_delay_secs: 300,
        }
    }
}
