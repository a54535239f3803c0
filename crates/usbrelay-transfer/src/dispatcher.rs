//! Push completed batches to every configured sink, then remove them.
//!
//! # Design
//! - Sinks run one after another and independently: a failing sink never stops the next.
//! - Within a sink, each file failure is logged and counted; remaining files are still sent.
//! - The batch is removed once every sink has been attempted for every file. Success is not
//!   required, so by default this is at-most-once delivery. `retain_on_failure` keeps a batch
//!   with any failed upload so the next cycle retries the whole batch.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use usbrelay_fsops::StagingArea;

use crate::error::TransferResult;
use crate::sink::{ConfiguredSink, compose_remote_path, relative_remote_path};

/// Upload counts for one sink over one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTally {
    /// Sink label.
    pub sink: &'static str,
    /// Files accepted by the sink.
    pub uploaded: usize,
    /// Files the sink failed to accept.
    pub failed: usize,
}

/// What happened to the batch directory after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDisposition {
    /// The batch directory was removed.
    Removed,
    /// The batch was kept because an upload failed and retention on failure is enabled.
    Retained,
    /// The batch was already gone when dispatch started.
    Vanished,
}

/// Summary of a single batch dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Batch directory that was dispatched.
    pub batch: PathBuf,
    /// Files found in the batch.
    pub files: usize,
    /// Per-sink outcomes, in sink order.
    pub sinks: Vec<SinkTally>,
    /// Final state of the batch directory.
    pub disposition: BatchDisposition,
}

impl DispatchReport {
    /// Total failed uploads across all sinks.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.sinks.iter().map(|tally| tally.failed).sum()
    }
}

/// Sends batches to the configured sinks.
#[derive(Debug, Clone)]
pub struct TransferDispatcher {
    sinks: Vec<ConfiguredSink>,
    retain_on_failure: bool,
}

impl TransferDispatcher {
    /// Dispatcher over `sinks`, tried in the given order.
    #[must_use]
    pub const fn new(sinks: Vec<ConfiguredSink>, retain_on_failure: bool) -> Self {
        Self {
            sinks,
            retain_on_failure,
        }
    }

    /// Configured sinks, in dispatch order.
    #[must_use]
    pub fn sinks(&self) -> &[ConfiguredSink] {
        &self.sinks
    }

    /// Upload every file of `batch` through every sink, then remove the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only when the batch cannot be listed or removed. Upload failures are
    /// logged and reported in the [`DispatchReport`].
    pub async fn dispatch(&self, batch: &Path) -> TransferResult<DispatchReport> {
        if !batch.is_dir() {
            warn!(batch = %batch.display(), "batch vanished before dispatch; skipping");
            return Ok(DispatchReport {
                batch: batch.to_path_buf(),
                files: 0,
                sinks: Vec::new(),
                disposition: BatchDisposition::Vanished,
            });
        }

        let files = StagingArea::batch_files(batch)?;
        info!(batch = %batch.display(), files = files.len(), "dispatching batch");

        let mut sinks = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            sinks.push(Self::run_sink(sink, batch, &files).await);
        }

        let mut report = DispatchReport {
            batch: batch.to_path_buf(),
            files: files.len(),
            sinks,
            disposition: BatchDisposition::Removed,
        };
        if self.retain_on_failure && report.failures() > 0 {
            warn!(
                batch = %batch.display(),
                failures = report.failures(),
                "keeping batch for retry after failed uploads"
            );
            report.disposition = BatchDisposition::Retained;
        } else {
            StagingArea::discard_batch(batch)?;
        }
        Ok(report)
    }

    async fn run_sink(sink: &ConfiguredSink, batch: &Path, files: &[PathBuf]) -> SinkTally {
        let mut tally = SinkTally {
            sink: sink.name(),
            uploaded: 0,
            failed: 0,
        };
        for file in files {
            let outcome = match relative_remote_path(batch, file) {
                Ok(relative) => {
                    let remote = compose_remote_path(sink.remote_root(), &relative);
                    sink.upload(file, &remote).await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => tally.uploaded += 1,
                Err(err) => {
                    tally.failed += 1;
                    warn!(
                        sink = sink.name(),
                        file = %file.display(),
                        error = %err,
                        detail = ?err,
                        "upload failed"
                    );
                }
            }
        }
        tally
    }
}
