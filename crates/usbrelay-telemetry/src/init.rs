//! Telemetry initialisation primitives and logging configuration.
//!
//! # Design
//! - Centralises logging setup (console fmt or JSON plus an optional rolling file) with a
//!   single entry point shared by both daemons.
//! - Records the build SHA once to avoid inconsistencies across modules.
//! - The returned guard owns the non-blocking file writer; dropping it flushes pending lines.

use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::error::{Result, TelemetryError};

/// Default logging target when `RUST_LOG` is not provided.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Number of rotated log files kept on disk.
pub const DEFAULT_MAX_LOG_FILES: usize = 7;

static BUILD_SHA: OnceCell<String> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Log level string (e.g., `info`, `debug`).
    pub level: &'a str,
    /// Output format selection for the console layer.
    pub format: LogFormat,
    /// Build identifier recorded in structured logs.
    pub build_sha: &'a str,
    /// Rolling file output, when enabled.
    pub file: Option<FileLogConfig<'a>>,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
            file: None,
        }
    }
}

/// Rolling file output settings.
#[derive(Debug, Clone)]
pub struct FileLogConfig<'a> {
    /// Directory the log files are written to.
    pub directory: &'a Path,
    /// File name prefix, e.g. `copyLogging.log`.
    pub file_name: &'a str,
    /// Number of rotated files retained.
    pub max_files: usize,
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Emit logs as structured JSON objects.
    Json,
    /// Emit human-readable logs.
    Pretty,
}

impl LogFormat {
    /// Choose a sensible default for the current build.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Keeps the background log writer alive for the lifetime of the process.
#[must_use = "dropping the guard stops the file writer"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the log directory cannot be prepared or the tracing subscriber
/// cannot be installed (for example, because another subscriber has already been set).
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<LoggingGuard> {
    BUILD_SHA
        .set(config.build_sha.to_string())
        .ok()
        .or(Some(()));

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let mut file_guard = None;
    if let Some(file) = &config.file {
        let (layer, guard) = file_layer(file, config.level)?;
        layers.push(layer);
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|source| TelemetryError::SubscriberInstall { source })?;

    Ok(LoggingGuard { _file: file_guard })
}

/// Access the build SHA recorded during logging initialisation.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

fn console_layer(config: &LoggingConfig<'_>) -> BoxedLayer {
    match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_thread_ids(false)
            .with_filter(build_env_filter(config.level))
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_filter(build_env_filter(config.level))
            .boxed(),
    }
}

fn file_layer(file: &FileLogConfig<'_>, level: &str) -> Result<(BoxedLayer, WorkerGuard)> {
    fs::create_dir_all(file.directory).map_err(|source| TelemetryError::LogDirCreate {
        path: file.directory.to_path_buf(),
        source,
    })?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file.file_name)
        .max_log_files(file.max_files)
        .build(file.directory)
        .map_err(|source| TelemetryError::LogFileOpen {
            path: file.directory.to_path_buf(),
            source,
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(build_env_filter(level))
        .boxed();
    Ok((layer, guard))
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_info_level_without_file() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.format, LogFormat::infer());
        assert!(config.file.is_none());
    }

    #[test]
    fn file_layer_creates_log_directory() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp = tempfile::tempdir()?;
        let directory = temp.path().join("logs");
        let file = FileLogConfig {
            directory: &directory,
            file_name: "copyLogging.log",
            max_files: DEFAULT_MAX_LOG_FILES,
        };
        let (_layer, _guard) = file_layer(&file, DEFAULT_LOG_LEVEL)?;
        assert!(directory.is_dir());
        Ok(())
    }

    #[test]
    fn init_logging_installs_subscriber_once() {
        let config = LoggingConfig {
            level: "info",
            format: LogFormat::Pretty,
            build_sha: "dev",
            file: None,
        };
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
