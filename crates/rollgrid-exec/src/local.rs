//! Execution on this machine.
//!
//! Used when the targets are local processes (development, demos). The
//! host argument of every call is ignored.

use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::exec::{check_output, spawn_error, ExecFuture, RemoteExec, SourceReader};

#[derive(Debug, Clone)]
pub struct LocalExec {
    shell: String,
}

impl LocalExec {
    pub fn new() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl Default for LocalExec {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteExec for LocalExec {
    fn run<'a>(&'a self, _host: IpAddr, command: &'a str) -> ExecFuture<'a, String> {
        Box::pin(async move {
            let output = Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| spawn_error(command, e))?;
            check_output(command, output)
        })
    }

    fn start_detached<'a>(
        &'a self,
        _host: IpAddr,
        program: &'a str,
        args: &'a [String],
    ) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            let child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| spawn_error(program, e))?;
            debug!(program, pid = ?child.id(), "started detached");
            // Dropping the handle leaves the child running.
            drop(child);
            Ok(())
        })
    }

    fn copy_file<'a>(
        &'a self,
        _host: IpAddr,
        src: SourceReader<'a>,
        dst: &'a str,
        mode: u32,
    ) -> ExecFuture<'a, u64> {
        Box::pin(async move {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(dst)
                .await?;
            // `mode` only applies when the file is created.
            tokio::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode)).await?;

            let written = tokio::io::copy(src, &mut file).await?;
            file.flush().await?;
            debug!(dst, bytes = written, "copied binary");
            Ok(written)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use std::net::Ipv4Addr;

    const HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn run_captures_stdout() {
        let exec = LocalExec::new();
        let out = exec.run(HOST, "echo hello").await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn run_reports_exit_code() {
        let exec = LocalExec::new();
        match exec.run(HOST, "echo boom >&2; exit 3").await {
            Err(ExecError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_command_is_distinguished() {
        let exec = LocalExec::new();
        let err = exec
            .run(HOST, "rollgrid-definitely-not-installed --version")
            .await
            .unwrap_err();
        assert!(err.is_command_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let exec = LocalExec::new();
        let err = exec
            .start_detached(HOST, "/nonexistent/rollgrid-binary", &[])
            .await
            .unwrap_err();
        assert!(err.is_command_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn copy_file_truncates_and_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("web");
        std::fs::write(&dst, b"an older and much longer binary").unwrap();

        let exec = LocalExec::new();
        let mut src: &[u8] = b"new binary";
        let written = exec
            .copy_file(HOST, &mut src, dst.to_str().unwrap(), 0o770)
            .await
            .unwrap();

        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&dst).unwrap(), b"new binary");
        let mode = std::fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o770);
    }

    #[tokio::test]
    async fn copy_into_missing_directory_fails() {
        let exec = LocalExec::new();
        let mut src: &[u8] = b"bin";
        assert!(matches!(
            exec.copy_file(HOST, &mut src, "/nonexistent-dir/rollgrid/web", 0o770)
                .await,
            Err(ExecError::Io(_))
        ));
    }

    #[tokio::test]
    async fn find_process_without_match_is_an_error() {
        let exec = LocalExec::new();
        // Either pidof reports no match or pidof itself is missing.
        assert!(exec
            .find_process(HOST, "rollgrid-no-such-process")
            .await
            .is_err());
    }
}
