//! Execution over the system `ssh` client.
//!
//! Every call opens its own `ssh` invocation in batch mode, so key based
//! authentication must already work non-interactively. File copies stream
//! the source into `cat` on the target.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;

use rollgrid_config::SshConfig;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecError, ExecResult};
use crate::exec::{check_output, shell_quote, spawn_error, ExecFuture, RemoteExec, SourceReader};

/// `ssh` exits 255 when the connection itself fails.
const EXIT_SSH_FAILURE: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshExec {
    user: Option<String>,
    port: u16,
    identity: Option<PathBuf>,
    connect_timeout_secs: u64,
}

impl SshExec {
    pub fn from_config(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            port: config.port,
            identity: config.identity.clone(),
            connect_timeout_secs: 10,
        }
    }

    fn destination(&self, host: IpAddr) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }

    /// `ssh` invocation that will run `remote` on `host`.
    fn command(&self, host: IpAddr, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs));
        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(self.destination(host)).arg(remote);
        cmd.kill_on_drop(true);
        cmd
    }

    fn check(&self, host: IpAddr, command: &str, output: std::process::Output) -> ExecResult<String> {
        if output.status.code() == Some(EXIT_SSH_FAILURE) {
            return Err(ExecError::Transport {
                host: host.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        check_output(command, output)
    }
}

impl RemoteExec for SshExec {
    fn run<'a>(&'a self, host: IpAddr, command: &'a str) -> ExecFuture<'a, String> {
        Box::pin(async move {
            let output = self
                .command(host, command)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| spawn_error("ssh", e))?;
            self.check(host, command, output)
        })
    }

    fn start_detached<'a>(
        &'a self,
        host: IpAddr,
        program: &'a str,
        args: &'a [String],
    ) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            let command = detached_command(program, args);
            self.run(host, &command).await?;
            debug!(%host, program, "started detached");
            Ok(())
        })
    }

    fn copy_file<'a>(
        &'a self,
        host: IpAddr,
        src: SourceReader<'a>,
        dst: &'a str,
        mode: u32,
    ) -> ExecFuture<'a, u64> {
        Box::pin(async move {
            let remote = copy_command(dst, mode);
            let mut child = self
                .command(host, &remote)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| spawn_error("ssh", e))?;

            let mut stdin = child.stdin.take().ok_or_else(|| {
                ExecError::Io(std::io::Error::other("ssh stdin was not captured"))
            })?;
            let written = tokio::io::copy(src, &mut stdin).await?;
            stdin.shutdown().await?;
            drop(stdin);

            let output = child.wait_with_output().await?;
            self.check(host, &remote, output)?;
            debug!(%host, dst, bytes = written, "copied binary");
            Ok(written)
        })
    }
}

/// Remote shell command that starts `program` detached from the session.
fn detached_command(program: &str, args: &[String]) -> String {
    let mut parts = vec!["nohup".to_string(), shell_quote(program)];
    parts.extend(args.iter().map(|a| shell_quote(a)));
    format!("{} > /dev/null 2>&1 &", parts.join(" "))
}

/// Remote shell command that writes stdin to `dst` with `mode`.
fn copy_command(dst: &str, mode: u32) -> String {
    let dst = shell_quote(dst);
    format!("cat > {dst} && chmod {mode:o} {dst}")
}
