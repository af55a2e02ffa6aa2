//! The remote execution capability set.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::process::Output;

use tokio::io::AsyncRead;

use crate::error::{ExecError, ExecResult};

/// Boxed future returned by every channel call.
pub type ExecFuture<'a, T> = Pin<Box<dyn Future<Output = ExecResult<T>> + Send + 'a>>;

/// Local file contents streamed to a target.
pub type SourceReader<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Exit status shells use for "command not found".
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// What a rollout can do on a target host.
///
/// Channels are shared by every action, so each call names its host.
pub trait RemoteExec: Send + Sync {
    /// Run `command` through the target's shell and return its stdout.
    fn run<'a>(&'a self, host: IpAddr, command: &'a str) -> ExecFuture<'a, String>;

    /// Start `program` in the background and return without waiting.
    fn start_detached<'a>(
        &'a self,
        host: IpAddr,
        program: &'a str,
        args: &'a [String],
    ) -> ExecFuture<'a, ()>;

    /// Create or truncate `dst` with `mode` and stream `src` into it.
    /// Returns the number of bytes written.
    fn copy_file<'a>(
        &'a self,
        host: IpAddr,
        src: SourceReader<'a>,
        dst: &'a str,
        mode: u32,
    ) -> ExecFuture<'a, u64>;

    /// PIDs of processes named `name`.
    ///
    /// `pidof` exits non-zero when nothing matches; that surfaces as
    /// `ExecError::NonZeroExit`, and a missing `pidof` as
    /// `ExecError::CommandNotFound`.
    fn find_process<'a>(&'a self, host: IpAddr, name: &'a str) -> ExecFuture<'a, Vec<u32>> {
        Box::pin(async move {
            let command = format!("pidof {}", shell_quote(name));
            let output = self.run(host, &command).await?;
            parse_pids(&command, &output)
        })
    }
}

/// Termination signals sent to a running binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful shutdown (SIGTERM).
    Term,
    /// Forced shutdown (SIGKILL).
    Kill,
}

impl Signal {
    pub fn number(self) -> i32 {
        match self {
            Self::Term => 15,
            Self::Kill => 9,
        }
    }

    /// Shell command delivering this signal to `pid`.
    pub fn kill_command(self, pid: u32) -> String {
        format!("kill -{self} {pid}")
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term => f.write_str("TERM"),
            Self::Kill => f.write_str("KILL"),
        }
    }
}

/// Parse whitespace separated PIDs.
pub fn parse_pids(command: &str, output: &str) -> ExecResult<Vec<u32>> {
    output
        .split_whitespace()
        .map(|pid| {
            pid.parse::<u32>().map_err(|_| ExecError::Output {
                command: command.to_string(),
                output: output.to_string(),
            })
        })
        .collect()
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Map a finished process to stdout or the matching error.
pub(crate) fn check_output(command: &str, output: Output) -> ExecResult<String> {
    match output.status.code() {
        Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        Some(EXIT_COMMAND_NOT_FOUND) => Err(ExecError::CommandNotFound {
            command: command.to_string(),
        }),
        Some(code) => Err(ExecError::NonZeroExit {
            command: command.to_string(),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        None => Err(ExecError::Signalled {
            command: command.to_string(),
        }),
    }
}

/// Map a spawn failure, treating a missing executable as "command not found".
pub(crate) fn spawn_error(command: &str, err: std::io::Error) -> ExecError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ExecError::CommandNotFound {
            command: command.to_string(),
        }
    } else {
        ExecError::Io(err)
    }
}
