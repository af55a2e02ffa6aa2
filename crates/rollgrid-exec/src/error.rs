//! Remote execution errors.

use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The shell (or the program itself) could not be found on the target.
    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("{command:?} exited with {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("{command:?} was killed by a signal")]
    Signalled { command: String },

    #[error("can't reach {host}: {reason}")]
    Transport { host: String, reason: String },

    #[error("unexpected output from {command:?}: {output:?}")]
    Output { command: String, output: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Whether the failure means the tooling itself is missing rather than
    /// the command reporting a result.
    pub fn is_command_not_found(&self) -> bool {
        matches!(self, Self::CommandNotFound { .. })
    }
}
