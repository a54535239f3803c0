//! Copy cycle: move files changed on the image into a fresh batch.
//!
//! # Design
//! - A cycle only mounts when the image's modification time is newer than the watermark.
//! - Scan, marker and copy run on the blocking pool inside a scoped mount, so the image is
//!   unmounted whatever the copy does.
//! - Any copy failure aborts the cycle. What the cycle wrote is removed before the marker is
//!   cleared so the forwarder never sees a partial copy, and the watermark stays put so the
//!   next tick retries the same window.
//! - Batch names have whole-second resolution, so a cycle can land in a batch an earlier cycle
//!   filled and the forwarder has not shipped yet. A failed cycle leaves that content alone.
//! - The watermark advances to the image time observed after unmount.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};
use usbrelay_device::DeviceMountSession;
use usbrelay_fsops::{
    ChangeScanner, CopyLock, FsOpsResult, StagingArea, Watermark, copy_with_structure,
    structured_target,
};
use usbrelay_telemetry::Metrics;

use crate::error::{AppError, AppResult};

/// Result of one copy cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The image has not changed since the watermark; nothing was mounted.
    Unchanged,
    /// The image was mounted and changed files were copied.
    Copied {
        /// Batch directory, present only when at least one file was copied.
        batch: Option<PathBuf>,
        /// Number of files copied.
        files: usize,
        /// Watermark after the cycle.
        watermark: Watermark,
    },
}

/// Watermark-driven copier from the mounted image into the staging area.
pub struct CopyPipeline {
    scanner: ChangeScanner,
    staging: StagingArea,
    watermark: Watermark,
    metrics: Metrics,
}

impl CopyPipeline {
    /// Pipeline that treats everything up to `watermark` as already copied.
    #[must_use]
    pub fn new(
        scanner: ChangeScanner,
        staging: StagingArea,
        watermark: Watermark,
        metrics: Metrics,
    ) -> Self {
        metrics.set_watermark_seconds(gauge_seconds(watermark));
        Self {
            scanner,
            staging,
            watermark,
            metrics,
        }
    }

    /// Pipeline whose watermark starts at the image's current modification time.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be inspected.
    pub fn from_image(
        scanner: ChangeScanner,
        staging: StagingArea,
        image: &Path,
        metrics: Metrics,
    ) -> AppResult<Self> {
        let watermark = Watermark::new(image_modified(image, "pipeline.initial_watermark")?);
        info!(
            image = %image.display(),
            watermark = watermark.unix_seconds(),
            "watermark initialised from image"
        );
        Ok(Self::new(scanner, staging, watermark, metrics))
    }

    /// Last image time known to be fully copied.
    #[must_use]
    pub const fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Staging area batches are written to.
    #[must_use]
    pub const fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Run one copy cycle against the session's image.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Copy`] when scanning or copying fails (the cycle is abandoned),
    /// [`AppError::Staging`] when the marker or a partial batch cannot be cleaned up, and
    /// [`AppError::Device`] or [`AppError::Io`] for device and image failures.
    pub async fn run(&mut self, session: &mut DeviceMountSession) -> AppResult<CopyOutcome> {
        let image = session.image().to_path_buf();
        let image_time = image_modified(&image, "pipeline.stat_image")?;
        if !self.watermark.is_exceeded_by(image_time) {
            debug!(watermark = self.watermark.unix_seconds(), "image unchanged");
            self.metrics.inc_copy_cycle("unchanged");
            return Ok(CopyOutcome::Unchanged);
        }

        let batch = self.staging.batch_path(Watermark::new(image_time));
        info!(
            image = %image.display(),
            batch = %batch.display(),
            watermark = self.watermark.unix_seconds(),
            "image changed; copying new files"
        );
        let job = CopyJob {
            scanner: self.scanner,
            source_root: session.mount_point().to_path_buf(),
            batch: batch.clone(),
            lock: self.staging.copy_lock(),
            watermark: self.watermark,
        };
        let body = async move {
            match tokio::task::spawn_blocking(move || job.execute()).await {
                Ok(result) => result,
                Err(source) => Err(AppError::join("copy.execute", source)),
            }
        };

        let copied = session
            .scoped(body)
            .await
            .map_err(|source| AppError::device("copy.mount_session", source))
            .and_then(|inner| inner);
        let files = match copied {
            Ok(files) => files,
            Err(err) => {
                self.metrics.inc_copy_cycle("failed");
                return Err(err);
            }
        };

        self.watermark = Watermark::new(image_modified(&image, "pipeline.restat_image")?);
        self.metrics.set_watermark_seconds(gauge_seconds(self.watermark));
        self.metrics.inc_copy_cycle("copied");
        self.metrics.add_files_copied(files);
        info!(
            files,
            watermark = self.watermark.unix_seconds(),
            "copy cycle complete"
        );
        Ok(CopyOutcome::Copied {
            batch: (files > 0).then_some(batch),
            files,
            watermark: self.watermark,
        })
    }
}

/// Work done while the image is mounted.
struct CopyJob {
    scanner: ChangeScanner,
    source_root: PathBuf,
    batch: PathBuf,
    lock: CopyLock,
    watermark: Watermark,
}

impl CopyJob {
    fn execute(self) -> AppResult<usize> {
        let files = self
            .scanner
            .scan(&self.source_root, self.watermark)
            .map_err(|source| AppError::copy("copy.scan", source))?;
        debug!(files = files.len(), "changed files found");

        let guard = self
            .lock
            .acquire()
            .map_err(|source| AppError::copy("copy.mark_active", source))?;

        let mut targets = Vec::with_capacity(files.len());
        match self.copy_all(&files, &mut targets) {
            Ok(count) => {
                guard
                    .release()
                    .map_err(|source| AppError::staging("copy.clear_active", source))?;
                Ok(count)
            }
            Err(source) => {
                warn!(
                    batch = %self.batch.display(),
                    attempted = targets.len(),
                    error = %source,
                    "copy failed; discarding this cycle's files"
                );
                StagingArea::discard_partial(&self.batch, &targets)
                    .map_err(|err| AppError::staging("copy.discard_partial", err))?;
                guard
                    .release()
                    .map_err(|err| AppError::staging("copy.clear_active", err))?;
                Err(AppError::copy("copy.copy_file", source))
            }
        }
    }

    /// Copy `files`, recording each destination in `targets` before it is written.
    fn copy_all(
        &self,
        files: &BTreeSet<PathBuf>,
        targets: &mut Vec<PathBuf>,
    ) -> FsOpsResult<usize> {
        for file in files {
            targets.push(structured_target(&self.source_root, file, &self.batch)?);
            copy_with_structure(&self.source_root, file, &self.batch)?;
        }
        Ok(files.len())
    }
}

fn image_modified(image: &Path, operation: &'static str) -> AppResult<SystemTime> {
    fs::metadata(image)
        .and_then(|metadata| metadata.modified())
        .map_err(|source| AppError::io(operation, image, source))
}

fn gauge_seconds(watermark: Watermark) -> i64 {
    i64::try_from(watermark.unix_seconds()).unwrap_or(i64::MAX)
}
