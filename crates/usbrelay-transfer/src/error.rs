//! # Design
//!
//! - Constant messages with sink, path and status details held in fields.
//! - Per-file upload failures use these variants too; the dispatcher logs and counts them
//!   rather than propagating.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use usbrelay_fsops::FsOpsError;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised while pushing batches to remote sinks.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Local file access failed.
    #[error("transfer io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// An HTTP request could not be completed.
    #[error("transfer http failure")]
    Http {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// A remote API answered with a non-success status.
    #[error("remote api rejected request")]
    Status {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Encoding an API argument failed.
    #[error("transfer encoding failure")]
    Encode {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// A transport helper could not be started.
    #[error("transfer helper could not be started")]
    Spawn {
        /// Program that failed to start.
        program: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A transport helper exited with a failure status.
    #[error("transfer helper failed")]
    Command {
        /// Program that failed.
        program: &'static str,
        /// Exit status, when the helper exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// A sink refused a file for a reason of its own.
    #[error("upload rejected")]
    Upload {
        /// Sink that rejected the file.
        sink: &'static str,
        /// Local file that was rejected.
        path: PathBuf,
        /// Sink-specific reason.
        reason: String,
    },
    /// Input validation failures.
    #[error("transfer invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Reading or removing a batch in the staging area failed.
    #[error("transfer staging failure")]
    Staging {
        /// Underlying filesystem error.
        #[from]
        source: FsOpsError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn messages_are_constant_and_sources_preserved() {
        let command = TransferError::Command {
            program: "scp",
            status: Some(1),
            stderr: "Permission denied".to_string(),
        };
        assert_eq!(command.to_string(), "transfer helper failed");
        assert!(command.source().is_none());

        let staging = TransferError::from(FsOpsError::InvalidInput {
            field: "batch",
            reason: "missing",
            value: None,
        });
        assert_eq!(staging.to_string(), "transfer staging failure");
        assert!(staging.source().is_some());
    }
}
