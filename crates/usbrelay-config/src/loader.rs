//! JSON-backed configuration loader.
//!
//! # Design
//! - Read the document once at startup; the result is immutable for the process lifetime.
//! - Resolve the base directory from the environment so both daemons agree on the layout.
//! - Keep validation in `validate.rs`; this module only assembles the validated view.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::defaults::{
    CONFIG_FILE_NAME, FILESYSTEM_TYPE, FORWARDER_CYCLE_SECS, HANDOFF_TIMEOUT_SECS, LOG_DIR_NAME,
    MOUNT_POINT, PARTITION_SUFFIX, RECENT_DIR_DEPTH, SETTLE_DELAY_SECS, TRANSFER_DIR_NAME,
    USB_IMAGE,
};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    DeviceSettings, DropboxSettings, RawConfig, RelayConfig, RelayPaths, ScpSettings,
    SecretString,
};
use crate::validate::{
    anchored, non_empty, non_negative_count, parse_log_format, positive_seconds, required,
};

/// Environment variable naming the configuration document explicitly.
pub const CONFIG_ENV: &str = "USBRELAY_CONFIG";
/// Environment variable naming the base directory.
pub const HOME_ENV: &str = "USBRELAY_HOME";

/// Where the configuration document lives and what relative paths are anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    /// Directory relative paths in the document resolve against.
    pub base_dir: PathBuf,
    /// Path of the JSON document.
    pub config_path: PathBuf,
}

impl ConfigLocation {
    /// Resolve the location from `USBRELAY_CONFIG`/`USBRELAY_HOME`, falling back to the
    /// directory that contains the running executable.
    ///
    /// # Errors
    ///
    /// Returns an error when no environment override is set and the executable path
    /// cannot be determined.
    pub fn from_env() -> ConfigResult<Self> {
        Self::resolve(
            std::env::var_os(CONFIG_ENV),
            std::env::var_os(HOME_ENV),
            std::env::current_exe,
        )
    }

    /// Location rooted at an explicit base directory.
    #[must_use]
    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let config_path = base_dir.join(CONFIG_FILE_NAME);
        Self {
            base_dir,
            config_path,
        }
    }

    fn resolve(
        config_env: Option<OsString>,
        home_env: Option<OsString>,
        current_exe: impl FnOnce() -> io::Result<PathBuf>,
    ) -> ConfigResult<Self> {
        let base_dir = match home_env {
            Some(home) => PathBuf::from(home),
            None => {
                let exe = current_exe().map_err(|source| ConfigError::BaseDir { source })?;
                exe.parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| ConfigError::BaseDir {
                        source: io::Error::other("executable path has no parent"),
                    })?
            }
        };
        let mut location = Self::from_base_dir(base_dir);
        if let Some(explicit) = config_env {
            location.config_path = PathBuf::from(explicit);
        }
        Ok(location)
    }

    /// Log directory used when the document cannot supply one.
    #[must_use]
    pub fn default_log_dir(&self) -> PathBuf {
        self.base_dir.join(LOG_DIR_NAME)
    }

    /// Read and validate the configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is missing, malformed, or fails validation.
    pub fn load(&self) -> ConfigResult<RelayConfig> {
        let raw = fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Read {
            path: self.config_path.clone(),
            source,
        })?;
        let config = parse_config(&raw, &self.config_path, &self.base_dir)?;
        debug!(path = %self.config_path.display(), "configuration document parsed");
        Ok(config)
    }
}

/// Parse and validate a configuration document held in memory.
///
/// # Errors
///
/// Returns an error if the document is malformed or fails validation.
pub fn parse_config(raw: &str, origin: &Path, base_dir: &Path) -> ConfigResult<RelayConfig> {
    let document: RawConfig = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    build_config(document, base_dir)
}

fn build_config(raw: RawConfig, base_dir: &Path) -> ConfigResult<RelayConfig> {
    let copy_check_cycle = positive_seconds(
        "CopyCheckCycleTime",
        required("CopyCheckCycleTime", raw.copy_check_cycle_time)?,
    )?;
    let delete_on_usb_cycle = positive_seconds(
        "DeleteOnUSBCycleTime",
        required("DeleteOnUSBCycleTime", raw.delete_on_usb_cycle_time)?,
    )?;
    let keep_max_files_on_usb = non_negative_count(
        "KeepMaxFilesOnUSB",
        required("KeepMaxFilesOnUSB", raw.keep_max_files_on_usb)?,
    )?;
    let recent_dir_depth = raw
        .recent_dir_depth
        .map_or(Ok(RECENT_DIR_DEPTH), |depth| {
            non_negative_count("RecentDirDepth", depth)
        })?;
    let forwarder_cycle = positive_seconds(
        "ForwarderCycleTime",
        raw.forwarder_cycle_time.unwrap_or(FORWARDER_CYCLE_SECS),
    )?;
    let handoff_timeout = positive_seconds(
        "HandoffTimeout",
        raw.handoff_timeout.unwrap_or(HANDOFF_TIMEOUT_SECS),
    )?;
    let settle_delay = match raw.settle_delay {
        Some(seconds) if seconds.abs() < f64::EPSILON => Duration::ZERO,
        Some(seconds) => positive_seconds("SettleDelay", seconds)?,
        None => positive_seconds("SettleDelay", SETTLE_DELAY_SECS)?,
    };

    let device = DeviceSettings {
        usb_image: raw.usb_image.unwrap_or_else(|| PathBuf::from(USB_IMAGE)),
        mount_point: raw.mount_point.unwrap_or_else(|| PathBuf::from(MOUNT_POINT)),
        filesystem_type: raw
            .filesystem_type
            .unwrap_or_else(|| FILESYSTEM_TYPE.to_string()),
        partition_suffix: raw
            .partition_suffix
            .unwrap_or_else(|| PARTITION_SUFFIX.to_string()),
        use_sudo: raw.use_sudo.unwrap_or(true),
        settle_delay,
    };

    let paths = RelayPaths {
        base_dir: base_dir.to_path_buf(),
        transfer_dir: anchored(
            base_dir,
            raw.transfer_dir
                .unwrap_or_else(|| PathBuf::from(TRANSFER_DIR_NAME)),
        ),
        log_dir: anchored(
            base_dir,
            raw.log_dir.unwrap_or_else(|| PathBuf::from(LOG_DIR_NAME)),
        ),
        metrics_textfile: raw.metrics_textfile.map(|path| anchored(base_dir, path)),
    };

    let log_format = raw
        .log_format
        .as_deref()
        .map(parse_log_format)
        .transpose()?;

    let dropbox = if raw.activate_dropbox_sync {
        Some(DropboxSettings {
            refresh_token: SecretString::new(non_empty(
                "DropBoxRefreshToken",
                raw.dropbox_refresh_token,
            )?),
            app_key: non_empty("DropboxAppKey", raw.dropbox_app_key)?,
            app_secret: SecretString::new(non_empty(
                "DropboxAppSecret",
                raw.dropbox_app_secret,
            )?),
            remote_root: required("DropBoxPath", raw.dropbox_path)?,
        })
    } else {
        None
    };

    let scp = if raw.activate_scp_sync {
        Some(ScpSettings {
            remote_root: non_empty("ScpPath", raw.scp_path)?,
            script: raw.scp_script.map(|path| anchored(base_dir, path)),
            create_dirs: raw.scp_create_dirs.unwrap_or(true),
        })
    } else {
        None
    };

    Ok(RelayConfig {
        copy_check_cycle,
        delete_on_usb_cycle,
        keep_max_files_on_usb,
        recent_dir_depth,
        forwarder_cycle,
        handoff_timeout,
        device,
        paths,
        log_format,
        dropbox,
        scp,
        retain_batch_on_failure: raw.retain_batch_on_failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogFormatPreference;

    const MINIMAL: &str = r#"{
        "CopyCheckCycleTime": 10,
        "DeleteOnUSBCycleTime": 600,
        "KeepMaxFilesOnUSB": 100
    }"#;

    fn parse(raw: &str) -> ConfigResult<RelayConfig> {
        parse_config(raw, Path::new("config.json"), Path::new("/opt/usbrelay"))
    }

    #[test]
    fn minimal_document_applies_defaults() -> ConfigResult<()> {
        let config = parse(MINIMAL)?;
        assert_eq!(config.copy_check_cycle, Duration::from_secs(10));
        assert_eq!(config.keep_max_files_on_usb, 100);
        assert_eq!(config.recent_dir_depth, 2);
        assert_eq!(config.forwarder_cycle, Duration::from_millis(4_500));
        assert_eq!(config.handoff_timeout, Duration::from_secs(30));
        assert_eq!(config.device.usb_image, PathBuf::from("/piusb.bin"));
        assert_eq!(config.device.mount_point, PathBuf::from("/mnt/usb_share"));
        assert_eq!(config.device.filesystem_type, "exfat");
        assert_eq!(config.device.partition_suffix, "p1");
        assert!(config.device.use_sudo);
        assert_eq!(config.device.settle_delay, Duration::from_millis(500));
        assert_eq!(
            config.paths.transfer_dir,
            PathBuf::from("/opt/usbrelay/transfer")
        );
        assert_eq!(config.paths.log_dir, PathBuf::from("/opt/usbrelay/logs"));
        assert!(config.dropbox.is_none());
        assert!(config.scp.is_none());
        assert!(config.log_format.is_none());
        assert!(!config.retain_batch_on_failure);
        Ok(())
    }

    #[test]
    fn sweep_ratio_follows_cycle_times() -> ConfigResult<()> {
        let config = parse(MINIMAL)?;
        assert!((config.sweep_cycle_ratio() - 60.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn missing_required_key_is_reported() {
        let err = parse(r#"{"CopyCheckCycleTime": 10, "KeepMaxFilesOnUSB": 5}"#);
        assert!(matches!(
            err,
            Err(ConfigError::MissingField {
                field: "DeleteOnUSBCycleTime"
            })
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(parse("{not json"), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            parse(r#"{"CopyCheckCycleTime": "ten"}"#),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn active_dropbox_requires_credentials() {
        let err = parse(
            r#"{
                "CopyCheckCycleTime": 10,
                "DeleteOnUSBCycleTime": 600,
                "KeepMaxFilesOnUSB": 100,
                "ActivateDropboxSync": true,
                "DropboxAppKey": "key"
            }"#,
        );
        assert!(matches!(
            err,
            Err(ConfigError::MissingField {
                field: "DropBoxRefreshToken"
            })
        ));
    }

    #[test]
    fn sinks_and_overrides_are_resolved() -> ConfigResult<()> {
        let config = parse(
            r#"{
                "CopyCheckCycleTime": 5,
                "DeleteOnUSBCycleTime": 50,
                "KeepMaxFilesOnUSB": 10,
                "ActivateDropboxSync": true,
                "DropBoxRefreshToken": "refresh",
                "DropboxAppKey": "key",
                "DropboxAppSecret": "secret",
                "DropBoxPath": "/camera/",
                "ActivateScpSync": true,
                "ScpPath": "pi@nas:/backup",
                "ScpScript": "scp-copy.exp",
                "TransferDir": "/var/spool/usbrelay",
                "SettleDelay": 0,
                "LogFormat": "json",
                "MetricsTextfile": "metrics/usbrelay.prom",
                "RetainBatchOnFailure": true
            }"#,
        )?;
        let dropbox = config.dropbox.ok_or(ConfigError::MissingField {
            field: "dropbox",
        })?;
        assert_eq!(dropbox.refresh_token.expose(), "refresh");
        assert_eq!(dropbox.remote_root, "/camera/");
        let scp = config.scp.ok_or(ConfigError::MissingField { field: "scp" })?;
        assert_eq!(scp.remote_root, "pi@nas:/backup");
        assert_eq!(
            scp.script,
            Some(PathBuf::from("/opt/usbrelay/scp-copy.exp"))
        );
        assert!(scp.create_dirs);
        assert_eq!(
            config.paths.transfer_dir,
            PathBuf::from("/var/spool/usbrelay")
        );
        assert_eq!(config.device.settle_delay, Duration::ZERO);
        assert_eq!(config.log_format, Some(LogFormatPreference::Json));
        assert_eq!(
            config.paths.metrics_textfile,
            Some(PathBuf::from("/opt/usbrelay/metrics/usbrelay.prom"))
        );
        assert!(config.retain_batch_on_failure);
        Ok(())
    }

    #[test]
    fn location_prefers_environment_overrides() -> ConfigResult<()> {
        let location = ConfigLocation::resolve(
            Some(OsString::from("/etc/usbrelay.json")),
            Some(OsString::from("/srv/relay")),
            || Err(io::Error::other("unused")),
        )?;
        assert_eq!(location.base_dir, PathBuf::from("/srv/relay"));
        assert_eq!(location.config_path, PathBuf::from("/etc/usbrelay.json"));

        let fallback =
            ConfigLocation::resolve(None, None, || Ok(PathBuf::from("/opt/usbrelay/bin/poller")))?;
        assert_eq!(fallback.base_dir, PathBuf::from("/opt/usbrelay/bin"));
        assert_eq!(
            fallback.config_path,
            PathBuf::from("/opt/usbrelay/bin/config.json")
        );
        Ok(())
    }

    #[test]
    fn location_surfaces_executable_lookup_failure() {
        let err = ConfigLocation::resolve(None, None, || Err(io::Error::other("no exe")));
        assert!(matches!(err, Err(ConfigError::BaseDir { .. })));
    }
}
