//! # Design
//!
//! - Constant error messages; device, path and exit details live in fields.
//! - Exit status is optional because a helper killed by a signal reports none.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for loop device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors raised by the block device layer and mount sessions.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A helper binary could not be started at all.
    #[error("device helper could not be started")]
    Spawn {
        /// Program that failed to start.
        program: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Creating the loop attachment failed.
    #[error("loop device attach failed")]
    Attach {
        /// Backing image that could not be attached.
        image: PathBuf,
        /// Exit status of the helper, when it exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Listing existing loop attachments failed.
    #[error("loop device listing failed")]
    ListAttachments {
        /// Exit status of the helper, when it exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// The loop device listing could not be decoded.
    #[error("loop device listing was not valid json")]
    ParseAttachments {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Mounting the partition failed.
    #[error("mount failed")]
    Mount {
        /// Device that could not be mounted.
        device: String,
        /// Target mount point.
        mount_point: PathBuf,
        /// Exit status of the helper, when it exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Unmounting the partition failed.
    #[error("unmount failed")]
    Unmount {
        /// Mount point that could not be released.
        mount_point: PathBuf,
        /// Exit status of the helper, when it exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}
