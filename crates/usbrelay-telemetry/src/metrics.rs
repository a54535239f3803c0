//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes only the counters the relay daemons update; there is no HTTP surface, the
//!   registry is rendered to a node-exporter textfile instead.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared by the pipeline components.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    copy_cycles_total: IntCounterVec,
    files_copied_total: IntCounter,
    sweeps_total: IntCounter,
    files_swept_total: IntCounter,
    sweep_failures_total: IntCounter,
    empty_dirs_removed_total: IntCounter,
    batches_dispatched_total: IntCounter,
    uploads_total: IntCounterVec,
    handoff_timeouts_total: IntCounter,
    watermark_seconds: IntGauge,
}

/// Snapshot of selected counters for assertions and health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Files copied into batches.
    pub files_copied_total: u64,
    /// Retention sweeps executed.
    pub sweeps_total: u64,
    /// Files deleted by retention sweeps.
    pub files_swept_total: u64,
    /// File and directory deletion failures during sweeps.
    pub sweep_failures_total: u64,
    /// Empty directories pruned during sweeps.
    pub empty_dirs_removed_total: u64,
    /// Batches handed to the sinks.
    pub batches_dispatched_total: u64,
    /// Handoff waits that gave up on a lingering marker.
    pub handoff_timeouts_total: u64,
    /// Latest watermark, seconds since the Unix epoch.
    pub watermark_seconds: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let copy_cycles_total = register(
            &registry,
            "usbrelay_copy_cycles_total",
            IntCounterVec::new(
                Opts::new("usbrelay_copy_cycles_total", "Poller copy cycles by outcome"),
                &["outcome"],
            ),
        )?;
        let files_copied_total = register(
            &registry,
            "usbrelay_files_copied_total",
            IntCounter::with_opts(Opts::new(
                "usbrelay_files_copied_total",
                "Files copied from the image into batches",
            )),
        )?;
        let sweeps_total = register(
            &registry,
            "usbrelay_sweeps_total",
            IntCounter::with_opts(Opts::new("usbrelay_sweeps_total", "Retention sweeps run")),
        )?;
        let files_swept_total = register(
            &registry,
            "usbrelay_files_swept_total",
            IntCounter::with_opts(Opts::new(
                "usbrelay_files_swept_total",
                "Files deleted from the image by retention",
            )),
        )?;
        let sweep_failures_total = register(
            &registry,
            "usbrelay_sweep_failures_total",
            IntCounter::with_opts(Opts::new(
                "usbrelay_sweep_failures_total",
                "Retention deletions that failed",
            )),
        )?;
        let empty_dirs_removed_total = register(
            &registry,
            "usbrelay_empty_dirs_removed_total",
            IntCounter::with_opts(Opts::new(
                "usbrelay_empty_dirs_removed_total",
                "Empty directories pruned from the image",
            )),
        )?;
        let batches_dispatched_total = register(
            &registry,
            "usbrelay_batches_dispatched_total",
            IntCounter::with_opts(Opts::new(
                "usbrelay_batches_dispatched_total",
                "Batches handed to the configured sinks",
            )),
        )?;
        let uploads_total = register(
            &registry,
            "usbrelay_uploads_total",
            IntCounterVec::new(
                Opts::new("usbrelay_uploads_total", "File uploads by sink and outcome"),
                &["sink", "outcome"],
            ),
        )?;
        let handoff_timeouts_total = register(
            &registry,
            "usbrelay_handoff_timeouts_total",
            IntCounter::with_opts(Opts::new(
                "usbrelay_handoff_timeouts_total",
                "Forwarder waits that timed out on the copy marker",
            )),
        )?;
        let watermark_seconds = register(
            &registry,
            "usbrelay_watermark_seconds",
            IntGauge::with_opts(Opts::new(
                "usbrelay_watermark_seconds",
                "Image modification time last copied",
            )),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                copy_cycles_total,
                files_copied_total,
                sweeps_total,
                files_swept_total,
                sweep_failures_total,
                empty_dirs_removed_total,
                batches_dispatched_total,
                uploads_total,
                handoff_timeouts_total,
                watermark_seconds,
            }),
        })
    }

    /// Count a poller cycle with the given outcome label.
    pub fn inc_copy_cycle(&self, outcome: &str) {
        self.inner
            .copy_cycles_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Add to the copied file counter.
    pub fn add_files_copied(&self, count: usize) {
        self.inner.files_copied_total.inc_by(to_u64(count));
    }

    /// Record the results of one retention sweep.
    pub fn record_sweep(&self, deleted: usize, failures: usize, dirs_removed: usize) {
        self.inner.sweeps_total.inc();
        self.inner.files_swept_total.inc_by(to_u64(deleted));
        self.inner.sweep_failures_total.inc_by(to_u64(failures));
        self.inner
            .empty_dirs_removed_total
            .inc_by(to_u64(dirs_removed));
    }

    /// Count a dispatched batch.
    pub fn inc_batch_dispatched(&self) {
        self.inner.batches_dispatched_total.inc();
    }

    /// Add upload attempts for a sink with the given outcome.
    pub fn add_uploads(&self, sink: &str, succeeded: bool, count: usize) {
        let outcome = if succeeded { "ok" } else { "failed" };
        self.inner
            .uploads_total
            .with_label_values(&[sink, outcome])
            .inc_by(to_u64(count));
    }

    /// Count a handoff wait that timed out.
    pub fn inc_handoff_timeout(&self) {
        self.inner.handoff_timeouts_total.inc();
    }

    /// Record the current watermark.
    pub fn set_watermark_seconds(&self, seconds: i64) {
        self.inner.watermark_seconds.set(seconds);
    }

    /// Number of uploads recorded for a sink and outcome.
    #[must_use]
    pub fn uploads(&self, sink: &str, succeeded: bool) -> u64 {
        let outcome = if succeeded { "ok" } else { "failed" };
        self.inner
            .uploads_total
            .with_label_values(&[sink, outcome])
            .get()
    }

    /// Number of copy cycles recorded with an outcome label.
    #[must_use]
    pub fn copy_cycles(&self, outcome: &str) -> u64 {
        self.inner
            .copy_cycles_total
            .with_label_values(&[outcome])
            .get()
    }

    /// Capture the scalar counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_copied_total: self.inner.files_copied_total.get(),
            sweeps_total: self.inner.sweeps_total.get(),
            files_swept_total: self.inner.files_swept_total.get(),
            sweep_failures_total: self.inner.sweep_failures_total.get(),
            empty_dirs_removed_total: self.inner.empty_dirs_removed_total.get(),
            batches_dispatched_total: self.inner.batches_dispatched_total.get(),
            handoff_timeouts_total: self.inner.handoff_timeouts_total.get(),
            watermark_seconds: self.inner.watermark_seconds.get(),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or yields invalid UTF-8.
    pub fn render(&self) -> Result<String> {
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Replace `path` with the rendered registry, via a sibling temp file and rename.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or any filesystem step fails.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| TelemetryError::MetricsWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let staging = path.with_extension("prom.tmp");
        fs::write(&staging, rendered).map_err(|source| TelemetryError::MetricsWrite {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, path).map_err(|source| TelemetryError::MetricsWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    collector: prometheus::Result<C>,
) -> Result<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector =
        collector.map_err(|source| TelemetryError::MetricsCollector { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_render() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_copy_cycle("copied");
        metrics.add_files_copied(3);
        metrics.record_sweep(2, 1, 4);
        metrics.add_uploads("dropbox", true, 2);
        metrics.add_uploads("dropbox", false, 1);
        metrics.inc_batch_dispatched();
        metrics.inc_handoff_timeout();
        metrics.set_watermark_seconds(2_000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_copied_total, 3);
        assert_eq!(snapshot.sweeps_total, 1);
        assert_eq!(snapshot.files_swept_total, 2);
        assert_eq!(snapshot.sweep_failures_total, 1);
        assert_eq!(snapshot.empty_dirs_removed_total, 4);
        assert_eq!(snapshot.batches_dispatched_total, 1);
        assert_eq!(snapshot.handoff_timeouts_total, 1);
        assert_eq!(snapshot.watermark_seconds, 2_000);
        assert_eq!(metrics.uploads("dropbox", true), 2);
        assert_eq!(metrics.uploads("dropbox", false), 1);
        assert_eq!(metrics.copy_cycles("copied"), 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("usbrelay_files_copied_total 3"));
        assert!(rendered.contains("usbrelay_watermark_seconds 2000"));
        Ok(())
    }

    #[test]
    fn textfile_is_replaced_atomically() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("textfile").join("usbrelay.prom");
        let metrics = Metrics::new()?;
        metrics.add_files_copied(1);
        metrics.write_textfile(&path)?;
        let written = fs::read_to_string(&path)?;
        assert!(written.contains("usbrelay_files_copied_total 1"));
        assert!(!path.with_extension("prom.tmp").exists());
        Ok(())
    }
}
