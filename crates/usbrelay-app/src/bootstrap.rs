//! Daemon boot sequences.
//!
//! # Design
//! - Configuration is read before logging exists; a load failure still gets a log line, in a
//!   file under the base directory when that much is known.
//! - Production entry points build system dependencies and delegate to `*_with` variants that
//!   take the device layer, sinks and ticker as arguments.
//! - Every fatal error is logged once here before it reaches `main`.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};
use usbrelay_config::{ConfigLocation, LogFormatPreference, RelayConfig};
use usbrelay_device::{DeviceMountSession, LoopDeviceLayer, SystemDeviceLayer};
use usbrelay_fsops::{ChangeScanner, RetentionSweeper, StagingArea};
use usbrelay_telemetry::{
    DEFAULT_MAX_LOG_FILES, FileLogConfig, GlobalContextGuard, LogFormat, LoggingConfig,
    LoggingGuard, Metrics, init_logging,
};
use usbrelay_transfer::{ConfiguredSink, DropboxSink, ScpSink, TransferDispatcher};

use crate::error::{AppError, AppResult};
use crate::forwarder::Forwarder;
use crate::pipeline::CopyPipeline;
use crate::poller::{Poller, RetentionCadence};
use crate::schedule::{SleepTicker, Ticker, run_scheduled};

/// Log file prefix for the poller.
pub const POLLER_LOG_FILE: &str = "copyLogging.log";
/// Log file prefix for the forwarder.
pub const FORWARDER_LOG_FILE: &str = "uploadLogging.log";

/// Entry point for the poller daemon. Runs until a fatal error.
///
/// # Errors
///
/// Returns an error if configuration, logging or the device cannot be set up, or if a cycle
/// fails with an error that is not confined to that cycle.
pub async fn run_poller() -> AppResult<()> {
    let (config, _logging) = start_daemon(POLLER_LOG_FILE)?;
    let _context = GlobalContextGuard::new("poller");
    info!("----STARTED usbrelay-poller----");
    info!(
        image = %config.device.usb_image.display(),
        interval_secs = config.copy_check_cycle.as_secs_f64(),
        "Configuration loaded."
    );

    let layer: Arc<dyn LoopDeviceLayer> =
        Arc::new(SystemDeviceLayer::new(config.device.use_sudo));
    let mut ticker = SleepTicker::new(config.copy_check_cycle);
    let result = run_poller_with(&config, layer, &mut ticker).await;
    report_exit("poller", result)
}

/// Entry point for the forwarder daemon. Runs until a fatal error.
///
/// # Errors
///
/// Returns an error if configuration, logging or a sink cannot be set up, or if the staging
/// area becomes unusable.
pub async fn run_forwarder() -> AppResult<()> {
    let (config, _logging) = start_daemon(FORWARDER_LOG_FILE)?;
    let _context = GlobalContextGuard::new("forwarder");
    info!("----STARTED usbrelay-forwarder----");
    info!(
        transfer_dir = %config.paths.transfer_dir.display(),
        dropbox = config.dropbox.is_some(),
        scp = config.scp.is_some(),
        "Configuration loaded."
    );

    let result = match build_sinks(&config) {
        Ok(sinks) => {
            let mut ticker = SleepTicker::new(config.forwarder_cycle);
            run_forwarder_with(&config, sinks, &mut ticker).await
        }
        Err(err) => Err(err),
    };
    report_exit("forwarder", result)
}

/// Run the poller with an injected device layer and ticker. Returns the cycles started.
///
/// # Errors
///
/// See [`run_poller`].
pub async fn run_poller_with<K>(
    config: &RelayConfig,
    layer: Arc<dyn LoopDeviceLayer>,
    ticker: &mut K,
) -> AppResult<usize>
where
    K: Ticker + ?Sized,
{
    let metrics =
        Metrics::new().map_err(|source| AppError::telemetry("telemetry.metrics", source))?;
    let mut poller = build_poller(config, layer, metrics).await?;
    run_scheduled(&mut poller, ticker).await
}

/// Run the forwarder with injected sinks and ticker. Returns the cycles started.
///
/// # Errors
///
/// See [`run_forwarder`].
pub async fn run_forwarder_with<K>(
    config: &RelayConfig,
    sinks: Vec<ConfiguredSink>,
    ticker: &mut K,
) -> AppResult<usize>
where
    K: Ticker + ?Sized,
{
    let metrics =
        Metrics::new().map_err(|source| AppError::telemetry("telemetry.metrics", source))?;
    let mut forwarder = build_forwarder(config, sinks, metrics)?;
    run_scheduled(&mut forwarder, ticker).await
}

/// Resolve the loop device and assemble a poller with its watermark at the image's current
/// modification time.
///
/// # Errors
///
/// Returns an error if the loop device cannot be resolved or the image cannot be inspected.
pub async fn build_poller(
    config: &RelayConfig,
    layer: Arc<dyn LoopDeviceLayer>,
    metrics: Metrics,
) -> AppResult<Poller> {
    let mut session = DeviceMountSession::new(layer, &config.device);
    let device = session
        .acquire()
        .await
        .map_err(|source| AppError::device("device.acquire", source))?;
    info!(device, "Loop Device");

    let pipeline = CopyPipeline::from_image(
        ChangeScanner::new(config.recent_dir_depth),
        StagingArea::new(&config.paths.transfer_dir),
        &config.device.usb_image,
        metrics.clone(),
    )?;
    Ok(Poller::new(
        session,
        RetentionCadence::new(config.sweep_cycle_ratio()),
        RetentionSweeper::new(config.keep_max_files_on_usb),
        pipeline,
        metrics,
    )
    .with_metrics_textfile(config.paths.metrics_textfile.clone()))
}

/// Create the staging area and assemble a forwarder over `sinks`.
///
/// # Errors
///
/// Returns an error if the staging directory cannot be created.
pub fn build_forwarder(
    config: &RelayConfig,
    sinks: Vec<ConfiguredSink>,
    metrics: Metrics,
) -> AppResult<Forwarder> {
    let staging = StagingArea::new(&config.paths.transfer_dir);
    staging
        .ensure_exists()
        .map_err(|source| AppError::staging("forward.ensure_staging", source))?;
    if sinks.is_empty() {
        warn!("no sinks enabled; batches will be removed without upload");
    }
    let gate = staging.handoff_gate(config.handoff_timeout);
    let dispatcher = TransferDispatcher::new(sinks, config.retain_batch_on_failure);
    Ok(Forwarder::new(staging, gate, dispatcher, metrics)
        .with_metrics_textfile(config.paths.metrics_textfile.clone()))
}

/// Sinks enabled by the configuration, Dropbox first.
///
/// # Errors
///
/// Returns an error if a sink's client cannot be built.
pub fn build_sinks(config: &RelayConfig) -> AppResult<Vec<ConfiguredSink>> {
    let mut sinks = Vec::new();
    if let Some(settings) = &config.dropbox {
        let sink = DropboxSink::new(settings)
            .map_err(|source| AppError::transfer("sink.dropbox", source))?;
        sinks.push(ConfiguredSink::new(
            Arc::new(sink),
            settings.remote_root.clone(),
        ));
    }
    if let Some(settings) = &config.scp {
        sinks.push(ConfiguredSink::new(
            Arc::new(ScpSink::new(settings)),
            settings.remote_root.clone(),
        ));
    }
    Ok(sinks)
}

fn start_daemon(log_file: &'static str) -> AppResult<(RelayConfig, LoggingGuard)> {
    let location = match ConfigLocation::from_env() {
        Ok(location) => location,
        Err(source) => {
            let _logging = init_logging(&LoggingConfig::default()).ok();
            error!(error = ?source, "configuration location could not be resolved");
            return Err(AppError::config("config.locate", source));
        }
    };

    match location.load() {
        Ok(config) => {
            let format = config.log_format.map_or_else(LogFormat::infer, log_format);
            let logging = init_logging(&file_logging(&config.paths.log_dir, log_file, format))
                .map_err(|source| AppError::telemetry("telemetry.init", source))?;
            Ok((config, logging))
        }
        Err(source) => {
            let log_dir = location.default_log_dir();
            let _logging =
                init_logging(&file_logging(&log_dir, log_file, LogFormat::infer())).ok();
            error!(
                path = %location.config_path.display(),
                error = ?source,
                "failed to load configuration"
            );
            Err(AppError::config("config.load", source))
        }
    }
}

fn file_logging<'a>(
    directory: &'a Path,
    file_name: &'a str,
    format: LogFormat,
) -> LoggingConfig<'a> {
    LoggingConfig {
        format,
        file: Some(FileLogConfig {
            directory,
            file_name,
            max_files: DEFAULT_MAX_LOG_FILES,
        }),
        ..LoggingConfig::default()
    }
}

const fn log_format(preference: LogFormatPreference) -> LogFormat {
    match preference {
        LogFormatPreference::Pretty => LogFormat::Pretty,
        LogFormatPreference::Json => LogFormat::Json,
    }
}

fn report_exit(mode: &'static str, result: AppResult<usize>) -> AppResult<()> {
    match result {
        Ok(cycles) => {
            info!(mode, cycles, "schedule finished");
            Ok(())
        }
        Err(err) => {
            error!(mode, operation = err.operation(), error = ?err, "daemon stopping");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_preference_maps_to_console_format() {
        assert_eq!(log_format(LogFormatPreference::Json), LogFormat::Json);
        assert_eq!(log_format(LogFormatPreference::Pretty), LogFormat::Pretty);
    }

    #[test]
    fn file_logging_uses_daemon_prefix_and_retention() {
        let config = file_logging(
            Path::new("/opt/usbrelay/logs"),
            POLLER_LOG_FILE,
            LogFormat::Json,
        );
        let file = config.file.as_ref().map(|file| (file.file_name, file.max_files));
        assert_eq!(file, Some(("copyLogging.log", 7)));
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn sinks_follow_configuration_order() -> anyhow::Result<()> {
        let config = usbrelay_config::parse_config(
            r#"{
                "CopyCheckCycleTime": 10,
                "DeleteOnUSBCycleTime": 600,
                "KeepMaxFilesOnUSB": 100,
                "ActivateDropboxSync": true,
                "DropBoxRefreshToken": "refresh",
                "DropboxAppKey": "key",
                "DropboxAppSecret": "secret",
                "DropBoxPath": "/camera",
                "ActivateScpSync": true,
                "ScpPath": "pi@nas:/backup"
            }"#,
            Path::new("config.json"),
            Path::new("/opt/usbrelay"),
        )?;
        let sinks = build_sinks(&config)?;
        let names: Vec<_> = sinks.iter().map(ConfiguredSink::name).collect();
        assert_eq!(names, vec!["dropbox", "scp"]);
        assert_eq!(sinks[1].remote_root(), "pi@nas:/backup");
        Ok(())
    }
}
