//! keel - command-line front end for the helper binary
//!
//! This crate provides:
//! - `ensure`, `version` and `run` commands that bring the helper up to date
//!   before using it
//! - Inspection and maintenance commands (`paths`, `clear-cache`)
//! - Configuration loading with command-line overrides

pub mod cli;
pub mod config;

pub use cli::Cli;
pub use config::{CliOverrides, Config};

use keel_updater::{ErrorCategory, UpdateError};

/// Exit codes for CLI operations
///
/// Exit codes provide machine-readable status for scripting and automation:
/// - 0: Success - operation completed successfully
/// - 1: General error - unspecified error occurred
/// - 2: Verification failed - manifest signature or binary checksum rejected
/// - 4: Connection failed - release server unreachable or answered an error
/// - 5: Invalid input - bad arguments, configuration or manifest contents
///
/// `keel run` exits with the helper's own exit code instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Signature or checksum verification failed (exit code 2)
    VerificationFailed = 2,
    /// Connection failed (exit code 4)
    ConnectionFailed = 4,
    /// Invalid input provided (exit code 5)
    InvalidInput = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Exit code for an update failure category
    pub fn from_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Trust | ErrorCategory::Integrity => ExitCode::VerificationFailed,
            ErrorCategory::Network => ExitCode::ConnectionFailed,
            ErrorCategory::Config => ExitCode::InvalidInput,
            ErrorCategory::LocalBinary | ErrorCategory::Filesystem => ExitCode::GeneralError,
        }
    }

    /// Exit code for an error surfaced at the top level
    pub fn from_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<UpdateError>())
            .map(|e| Self::from_category(e.category()))
            .unwrap_or(ExitCode::GeneralError)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::VerificationFailed => "VERIFICATION_FAILED",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::VerificationFailed as i32, 2);
        assert_eq!(ExitCode::ConnectionFailed as i32, 4);
        assert_eq!(ExitCode::InvalidInput as i32, 5);
        assert_eq!(i32::from(ExitCode::ConnectionFailed), 4);
    }

    #[test]
    fn test_exit_code_from_category() {
        assert_eq!(ExitCode::from_category(ErrorCategory::Trust), ExitCode::VerificationFailed);
        assert_eq!(ExitCode::from_category(ErrorCategory::Integrity), ExitCode::VerificationFailed);
        assert_eq!(ExitCode::from_category(ErrorCategory::Network), ExitCode::ConnectionFailed);
        assert_eq!(ExitCode::from_category(ErrorCategory::Config), ExitCode::InvalidInput);
        assert_eq!(ExitCode::from_category(ErrorCategory::Filesystem), ExitCode::GeneralError);
    }

    #[test]
    fn test_exit_code_from_wrapped_error() {
        let err = Err::<(), _>(UpdateError::NetworkError("refused".into()))
            .context("failed to update helper")
            .unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConnectionFailed);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::GeneralError);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::Success.name(), "SUCCESS");
        assert_eq!(ExitCode::VerificationFailed.name(), "VERIFICATION_FAILED");
        assert_eq!(ExitCode::InvalidInput.name(), "INVALID_INPUT");
    }
}
