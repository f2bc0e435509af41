//! The per-suite test executor boundary.
//!
//! The orchestrator hands one suite at a time to a [`SuiteExecutor`], which
//! runs the suite's tests and mutates its result state. Failures the
//! executor cannot express as a suite return code surface as [`ExecError`],
//! whose variants carry the fixed process exit codes the orchestrator's
//! failure classification relies on.

pub mod process;

use async_trait::async_trait;

use crate::archival::Archival;
use crate::suite::Suite;

pub use process::ProcessExecutor;

/// Exit code for an I/O failure during a suite. Fatal: stops the loop.
pub const IO_ERROR_EXIT_CODE: i32 = 74;

/// Exit code for a logger runtime/configuration failure. Also used when
/// log output is found incomplete at shutdown.
pub const LOGGER_ERROR_EXIT_CODE: i32 = 75;

/// Exit code for a user-requested abort.
pub const USER_INTERRUPT_EXIT_CODE: i32 = 130;

/// Suite return code recorded for an unclassified executor error.
/// Non-fatal: the suite is marked failed and the loop continues.
pub const UNEXPECTED_ERROR_CODE: i32 = 2;

/// Errors escaping a suite's execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The user requested an abort while the suite was running.
    #[error("user interrupt")]
    UserInterrupt,

    /// The logging pipeline is misconfigured or failed at runtime.
    #[error("logger runtime configuration error: {0}")]
    LoggerConfig(String),

    /// An I/O failure occurred during the suite.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything the executor could not classify.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ExecError {
    /// The fixed process exit code associated with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::UserInterrupt => USER_INTERRUPT_EXIT_CODE,
            ExecError::LoggerConfig(_) => LOGGER_ERROR_EXIT_CODE,
            ExecError::Io(_) => IO_ERROR_EXIT_CODE,
            ExecError::Unexpected(_) => UNEXPECTED_ERROR_CODE,
        }
    }
}

/// Executes one suite's tests, mutating the suite's result state.
#[async_trait]
pub trait SuiteExecutor: Send + Sync {
    /// Runs `suite`, recording pass/fail tallies and the suite return code
    /// in its state. Artifacts of failing tests go to `archive` when
    /// archival is enabled.
    async fn execute(&self, suite: &Suite, archive: Option<&Archival>) -> Result<(), ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_fixed() {
        assert_eq!(ExecError::UserInterrupt.exit_code(), 130);
        assert_eq!(ExecError::LoggerConfig("x".into()).exit_code(), 75);
        assert_eq!(
            ExecError::Io(std::io::Error::other("disk gone")).exit_code(),
            74
        );
        assert_eq!(
            ExecError::Unexpected(anyhow::anyhow!("boom")).exit_code(),
            2
        );
    }
}
