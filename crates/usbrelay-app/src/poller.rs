//! The poller daemon's cycle: an occasional retention sweep, then a copy check.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};
use usbrelay_device::DeviceMountSession;
use usbrelay_fsops::{RetentionSweeper, SweepReport};
use usbrelay_telemetry::Metrics;

use crate::error::{AppError, AppResult};
use crate::pipeline::{CopyOutcome, CopyPipeline};
use crate::schedule::ScheduledTask;

/// Decides which poller cycles also sweep the image.
///
/// The counter grows by one per cycle; a sweep is due once it exceeds the ratio of the sweep
/// interval to the copy interval, and the counter restarts after a completed sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionCadence {
    ratio: f64,
    counter: u32,
}

impl RetentionCadence {
    /// Cadence that sweeps after more than `ratio` cycles.
    #[must_use]
    pub const fn new(ratio: f64) -> Self {
        Self { ratio, counter: 0 }
    }

    /// Count a cycle and report whether a sweep is due.
    pub fn is_due(&mut self) -> bool {
        self.counter = self.counter.saturating_add(1);
        f64::from(self.counter) > self.ratio
    }

    /// Cycles counted since the last sweep.
    #[must_use]
    pub const fn counter(&self) -> u32 {
        self.counter
    }

    /// Restart counting after a sweep.
    pub const fn reset(&mut self) {
        self.counter = 0;
    }
}

/// Poller state carried across cycles.
pub struct Poller {
    session: DeviceMountSession,
    cadence: RetentionCadence,
    sweeper: RetentionSweeper,
    pipeline: CopyPipeline,
    metrics: Metrics,
    metrics_textfile: Option<PathBuf>,
}

impl Poller {
    /// Assemble a poller from its parts.
    #[must_use]
    pub const fn new(
        session: DeviceMountSession,
        cadence: RetentionCadence,
        sweeper: RetentionSweeper,
        pipeline: CopyPipeline,
        metrics: Metrics,
    ) -> Self {
        Self {
            session,
            cadence,
            sweeper,
            pipeline,
            metrics,
            metrics_textfile: None,
        }
    }

    /// Rewrite `path` with the metrics registry after every cycle.
    #[must_use]
    pub fn with_metrics_textfile(mut self, path: Option<PathBuf>) -> Self {
        self.metrics_textfile = path;
        self
    }

    /// Copy pipeline, for inspecting the watermark.
    #[must_use]
    pub const fn pipeline(&self) -> &CopyPipeline {
        &self.pipeline
    }

    /// Retention cadence state.
    #[must_use]
    pub const fn cadence(&self) -> &RetentionCadence {
        &self.cadence
    }

    /// Sweep the image if the cadence says so. Returns the report of a sweep that ran.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sweep`] if the image tree cannot be walked and
    /// [`AppError::Device`] if mounting or unmounting fails.
    pub async fn sweep_if_due(&mut self) -> AppResult<Option<SweepReport>> {
        if !self.cadence.is_due() {
            return Ok(None);
        }
        info!(counter = self.cadence.counter(), "running retention sweep");

        let sweeper = self.sweeper;
        let root = self.session.mount_point().to_path_buf();
        let body = async move {
            match tokio::task::spawn_blocking(move || sweeper.sweep(&root)).await {
                Ok(result) => result.map_err(|source| AppError::sweep("sweep.run", source)),
                Err(source) => Err(AppError::join("sweep.execute", source)),
            }
        };
        let report = self
            .session
            .scoped(body)
            .await
            .map_err(|source| AppError::device("sweep.mount_session", source))
            .and_then(|inner| inner)?;

        self.metrics.record_sweep(
            report.files_deleted,
            report.deletion_failures,
            report.dirs_removed,
        );
        self.cadence.reset();
        info!(
            seen = report.files_seen,
            deleted = report.files_deleted,
            failures = report.deletion_failures,
            skipped = report.entries_skipped,
            dirs_removed = report.dirs_removed,
            "retention sweep complete"
        );
        Ok(Some(report))
    }

    /// Run the copy check.
    ///
    /// # Errors
    ///
    /// See [`CopyPipeline::run`].
    pub async fn copy_new_files(&mut self) -> AppResult<CopyOutcome> {
        self.pipeline.run(&mut self.session).await
    }

    fn publish_metrics(&self) {
        if let Some(path) = &self.metrics_textfile
            && let Err(err) = self.metrics.write_textfile(path)
        {
            warn!(path = %path.display(), error = ?err, "failed to write metrics textfile");
        }
    }
}

#[async_trait]
impl ScheduledTask for Poller {
    fn name(&self) -> &'static str {
        "poller"
    }

    async fn run_cycle(&mut self) -> AppResult<()> {
        let swept = self.sweep_if_due().await.map(|_| ());
        let result = match swept {
            Err(err) if !err.is_cycle_local() => Err(err),
            swept => {
                let copied = self.copy_new_files().await.map(|_| ());
                cycle_result(swept, copied)
            }
        };
        self.publish_metrics();
        result
    }
}

/// Merge the sweep and copy outcomes of one cycle. A copy error takes precedence; a sweep
/// error it displaces is logged here.
fn cycle_result(swept: AppResult<()>, copied: AppResult<()>) -> AppResult<()> {
    match (swept, copied) {
        (Err(sweep), Err(copy)) => {
            warn!(
                operation = sweep.operation(),
                error = ?sweep,
                "retention sweep failed"
            );
            Err(copy)
        }
        (Err(sweep), Ok(())) => Err(sweep),
        (Ok(()), copied) => copied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep_error() -> AppError {
        AppError::sweep(
            "sweep.run",
            usbrelay_fsops::FsOpsError::InvalidInput {
                field: "root",
                reason: "unreadable",
                value: None,
            },
        )
    }

    fn copy_error() -> AppError {
        AppError::copy(
            "copy.copy_file",
            usbrelay_fsops::FsOpsError::InvalidInput {
                field: "file",
                reason: "outside_source_root",
                value: None,
            },
        )
    }

    #[test]
    fn failed_sweep_is_reported_after_a_successful_copy() {
        let result = cycle_result(Err(sweep_error()), Ok(()));
        assert!(matches!(result, Err(AppError::Sweep { .. })));
        assert!(cycle_result(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn copy_failure_outranks_a_failed_sweep() {
        let result = cycle_result(Err(sweep_error()), Err(copy_error()));
        assert!(matches!(result, Err(AppError::Copy { .. })));
        let result = cycle_result(Ok(()), Err(copy_error()));
        assert!(matches!(result, Err(AppError::Copy { .. })));
    }

    #[test]
    fn cadence_sweeps_once_the_ratio_is_exceeded() {
        let mut cadence = RetentionCadence::new(3.0);
        assert!(!cadence.is_due());
        assert!(!cadence.is_due());
        assert!(!cadence.is_due());
        assert!(cadence.is_due());
        assert_eq!(cadence.counter(), 4);
        cadence.reset();
        assert!(!cadence.is_due());
    }

    #[test]
    fn fractional_ratio_rounds_up_in_cycles() {
        let mut cadence = RetentionCadence::new(2.5);
        assert!(!cadence.is_due());
        assert!(!cadence.is_due());
        assert!(cadence.is_due());
    }

    #[test]
    fn ratio_below_one_sweeps_every_cycle() {
        let mut cadence = RetentionCadence::new(0.5);
        assert!(cadence.is_due());
        cadence.reset();
        assert!(cadence.is_due());
    }
}
