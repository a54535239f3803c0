//! # Design
//!
//! - Centralize daemon-level errors for bootstrap and the two polling loops.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Copy and sweep failures only end the current cycle; everything else stops the daemon.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be located, read or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: usbrelay_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: usbrelay_telemetry::TelemetryError,
    },
    /// Loop device attach, mount or unmount failed.
    #[error("device operation failed")]
    Device {
        /// Operation identifier.
        operation: &'static str,
        /// Source device error.
        source: usbrelay_device::DeviceError,
    },
    /// Building a batch from the mounted image failed.
    #[error("copy cycle failed")]
    Copy {
        /// Operation identifier.
        operation: &'static str,
        /// Source filesystem error.
        source: usbrelay_fsops::FsOpsError,
    },
    /// Retention sweep could not walk the mounted image.
    #[error("retention sweep failed")]
    Sweep {
        /// Operation identifier.
        operation: &'static str,
        /// Source filesystem error.
        source: usbrelay_fsops::FsOpsError,
    },
    /// Staging directory or copy marker could not be maintained.
    #[error("staging operation failed")]
    Staging {
        /// Operation identifier.
        operation: &'static str,
        /// Source filesystem error.
        source: usbrelay_fsops::FsOpsError,
    },
    /// Batch dispatch failed outside of per-file upload handling.
    #[error("transfer operation failed")]
    Transfer {
        /// Operation identifier.
        operation: &'static str,
        /// Source transfer error.
        source: usbrelay_transfer::TransferError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Blocking filesystem work panicked or was cancelled.
    #[error("blocking task failed")]
    Join {
        /// Operation identifier.
        operation: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: usbrelay_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: usbrelay_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn device(
        operation: &'static str,
        source: usbrelay_device::DeviceError,
    ) -> Self {
        Self::Device { operation, source }
    }

    pub(crate) const fn copy(operation: &'static str, source: usbrelay_fsops::FsOpsError) -> Self {
        Self::Copy { operation, source }
    }

    pub(crate) const fn sweep(operation: &'static str, source: usbrelay_fsops::FsOpsError) -> Self {
        Self::Sweep { operation, source }
    }

    pub(crate) const fn staging(
        operation: &'static str,
        source: usbrelay_fsops::FsOpsError,
    ) -> Self {
        Self::Staging { operation, source }
    }

    pub(crate) const fn transfer(
        operation: &'static str,
        source: usbrelay_transfer::TransferError,
    ) -> Self {
        Self::Transfer { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: Some(path.into()),
            source,
        }
    }

    pub(crate) const fn join(operation: &'static str, source: tokio::task::JoinError) -> Self {
        Self::Join { operation, source }
    }

    /// Whether the error only ends the current cycle, leaving the daemon running.
    #[must_use]
    pub const fn is_cycle_local(&self) -> bool {
        matches!(self, Self::Copy { .. } | Self::Sweep { .. })
    }

    /// Operation identifier carried by the error.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Config { operation, .. }
            | Self::Telemetry { operation, .. }
            | Self::Device { operation, .. }
            | Self::Copy { operation, .. }
            | Self::Sweep { operation, .. }
            | Self::Staging { operation, .. }
            | Self::Transfer { operation, .. }
            | Self::Io { operation, .. }
            | Self::Join { operation, .. } => *operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::path::Path;

    fn fs_error() -> usbrelay_fsops::FsOpsError {
        usbrelay_fsops::FsOpsError::InvalidInput {
            field: "file",
            reason: "outside_source_root",
            value: Some("/elsewhere".to_string()),
        }
    }

    #[test]
    fn copy_and_sweep_errors_only_end_the_cycle() {
        assert!(AppError::copy("copy.batch", fs_error()).is_cycle_local());
        assert!(AppError::sweep("sweep.walk", fs_error()).is_cycle_local());
        assert!(!AppError::staging("staging.release", fs_error()).is_cycle_local());
        assert!(
            !AppError::device(
                "device.acquire",
                usbrelay_device::DeviceError::Unmount {
                    mount_point: PathBuf::from("/mnt/usb_share"),
                    status: Some(32),
                    stderr: "target is busy".to_string(),
                },
            )
            .is_cycle_local()
        );
    }

    #[test]
    fn messages_are_constant_and_sources_preserved() {
        let err = AppError::io(
            "pipeline.stat_image",
            Path::new("/piusb.bin"),
            io::Error::other("gone"),
        );
        assert_eq!(err.to_string(), "io operation failed");
        assert_eq!(err.operation(), "pipeline.stat_image");
        assert!(err.source().is_some());

        let err = AppError::copy("copy.batch", fs_error());
        assert_eq!(err.to_string(), "copy cycle failed");
        assert!(err.source().is_some());
    }
}
