//! Typed configuration models.
//!
//! # Design
//! - `RawConfig` mirrors the on-disk JSON keys exactly; `RelayConfig` is the validated,
//!   immutable view both daemons consume.
//! - Secrets never appear in `Debug` output.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Validated configuration shared by the poller and the forwarder.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interval between poller cycles (`CopyCheckCycleTime`).
    pub copy_check_cycle: Duration,
    /// Interval between retention sweeps (`DeleteOnUSBCycleTime`).
    pub delete_on_usb_cycle: Duration,
    /// Maximum number of files retained on the image (`KeepMaxFilesOnUSB`).
    pub keep_max_files_on_usb: usize,
    /// Number of most recently modified subdirectories scanned per level.
    pub recent_dir_depth: usize,
    /// Interval between forwarder cycles.
    pub forwarder_cycle: Duration,
    /// Upper bound on how long the forwarder waits for an active copy.
    pub handoff_timeout: Duration,
    /// Loop device and mount settings.
    pub device: DeviceSettings,
    /// Filesystem layout for staging, logs, and metrics.
    pub paths: RelayPaths,
    /// Preferred console log format, when configured.
    pub log_format: Option<LogFormatPreference>,
    /// Dropbox sink settings when `ActivateDropboxSync` is enabled.
    pub dropbox: Option<DropboxSettings>,
    /// Secure-copy sink settings when `ActivateScpSync` is enabled.
    pub scp: Option<ScpSettings>,
    /// Keep batches with failed uploads for the next forwarder cycle.
    pub retain_batch_on_failure: bool,
}

impl RelayConfig {
    /// Number of copy cycles that must elapse before a retention sweep runs.
    #[must_use]
    pub fn sweep_cycle_ratio(&self) -> f64 {
        self.delete_on_usb_cycle.as_secs_f64() / self.copy_check_cycle.as_secs_f64()
    }
}

/// Loop device and mount settings for the backing image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Image file exported through the USB gadget.
    pub usb_image: PathBuf,
    /// Directory the image partition is mounted on.
    pub mount_point: PathBuf,
    /// Filesystem type passed to `mount -t`.
    pub filesystem_type: String,
    /// Suffix appended to the loop device to address the data partition.
    pub partition_suffix: String,
    /// Prefix device commands with `sudo`.
    pub use_sudo: bool,
    /// Pause after each mount/unmount.
    pub settle_delay: Duration,
}

/// Resolved filesystem layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPaths {
    /// Directory the configuration and relative paths are anchored to.
    pub base_dir: PathBuf,
    /// Staging directory holding batches and the copy marker.
    pub transfer_dir: PathBuf,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    /// Prometheus textfile written after every cycle, when configured.
    pub metrics_textfile: Option<PathBuf>,
}

/// Console log format preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatPreference {
    /// Human-readable output.
    Pretty,
    /// Structured JSON output.
    Json,
}

/// Credentials and destination for the Dropbox sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropboxSettings {
    /// OAuth2 refresh token.
    pub refresh_token: SecretString,
    /// Application key (OAuth2 client id).
    pub app_key: String,
    /// Application secret (OAuth2 client secret).
    pub app_secret: SecretString,
    /// Remote folder prefix uploads are placed under.
    pub remote_root: String,
}

/// Destination for the secure-copy sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpSettings {
    /// Remote destination root, usually `user@host:/path`.
    pub remote_root: String,
    /// Optional `expect` script wrapping the scp invocation.
    pub script: Option<PathBuf>,
    /// Create the remote parent directory before each upload.
    pub create_dirs: bool,
}

/// String wrapper that keeps credentials out of logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Borrow the secret value for use on the wire.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("SecretString(***)")
    }
}

/// On-disk document; keys keep the names deployed configs already use.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawConfig {
    #[serde(rename = "CopyCheckCycleTime")]
    pub(crate) copy_check_cycle_time: Option<f64>,
    #[serde(rename = "DeleteOnUSBCycleTime")]
    pub(crate) delete_on_usb_cycle_time: Option<f64>,
    #[serde(rename = "KeepMaxFilesOnUSB")]
    pub(crate) keep_max_files_on_usb: Option<i64>,
    #[serde(rename = "ActivateDropboxSync", default)]
    pub(crate) activate_dropbox_sync: bool,
    #[serde(rename = "ActivateScpSync", default)]
    pub(crate) activate_scp_sync: bool,
    #[serde(rename = "DropBoxRefreshToken")]
    pub(crate) dropbox_refresh_token: Option<String>,
    #[serde(rename = "DropboxAppKey")]
    pub(crate) dropbox_app_key: Option<String>,
    #[serde(rename = "DropboxAppSecret")]
    pub(crate) dropbox_app_secret: Option<String>,
    #[serde(rename = "DropBoxPath")]
    pub(crate) dropbox_path: Option<String>,
    #[serde(rename = "ScpPath")]
    pub(crate) scp_path: Option<String>,
    #[serde(rename = "ScpScript")]
    pub(crate) scp_script: Option<PathBuf>,
    #[serde(rename = "ScpCreateDirs")]
    pub(crate) scp_create_dirs: Option<bool>,
    #[serde(rename = "UsbImage")]
    pub(crate) usb_image: Option<PathBuf>,
    #[serde(rename = "MountPoint")]
    pub(crate) mount_point: Option<PathBuf>,
    #[serde(rename = "FilesystemType")]
    pub(crate) filesystem_type: Option<String>,
    #[serde(rename = "PartitionSuffix")]
    pub(crate) partition_suffix: Option<String>,
    #[serde(rename = "UseSudo")]
    pub(crate) use_sudo: Option<bool>,
    #[serde(rename = "RecentDirDepth")]
    pub(crate) recent_dir_depth: Option<i64>,
    #[serde(rename = "ForwarderCycleTime")]
    pub(crate) forwarder_cycle_time: Option<f64>,
    #[serde(rename = "HandoffTimeout")]
    pub(crate) handoff_timeout: Option<f64>,
    #[serde(rename = "SettleDelay")]
    pub(crate) settle_delay: Option<f64>,
    #[serde(rename = "TransferDir")]
    pub(crate) transfer_dir: Option<PathBuf>,
    #[serde(rename = "LogDir")]
    pub(crate) log_dir: Option<PathBuf>,
    #[serde(rename = "LogFormat")]
    pub(crate) log_format: Option<String>,
    #[serde(rename = "MetricsTextfile")]
    pub(crate) metrics_textfile: Option<PathBuf>,
    #[serde(rename = "RetainBatchOnFailure", default)]
    pub(crate) retain_batch_on_failure: bool,
}
