//! rollgrid-exec — how a rollout reaches its targets.
//!
//! The rollout needs four capabilities on a target: run a command and
//! capture its output, start a program detached, copy a local file to a
//! path with a mode, and find a process by name. `RemoteExec` is that
//! capability set; `LocalExec` and `SshExec` implement it.
//!
//! Only Unix targets are supported (`kill`, `pidof`, `nohup`).

pub mod error;
pub mod exec;
pub mod local;
pub mod ssh;

pub use error::{ExecError, ExecResult};
pub use exec::{parse_pids, shell_quote, ExecFuture, RemoteExec, Signal, SourceReader};
pub use local::LocalExec;
pub use ssh::SshExec;

use std::sync::Arc;

use rollgrid_config::Transport;

/// Build the channel a config asks for.
pub fn from_transport(transport: &Transport) -> Arc<dyn RemoteExec> {
    match transport {
        Transport::Local => Arc::new(LocalExec::new()),
        Transport::Ssh(ssh) => Arc::new(SshExec::from_config(ssh)),
    }
}
