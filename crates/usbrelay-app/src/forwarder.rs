//! The forwarder daemon's cycle: wait for the poller to finish writing, then ship every
//! batch in the staging area.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use usbrelay_fsops::{HandoffGate, StagingArea};
use usbrelay_telemetry::Metrics;
use usbrelay_transfer::{BatchDisposition, DispatchReport, TransferDispatcher};

use crate::error::{AppError, AppResult};
use crate::schedule::ScheduledTask;

/// Forwarder state carried across cycles.
pub struct Forwarder {
    staging: StagingArea,
    gate: HandoffGate,
    dispatcher: TransferDispatcher,
    metrics: Metrics,
    metrics_textfile: Option<PathBuf>,
}

impl Forwarder {
    /// Assemble a forwarder from its parts.
    #[must_use]
    pub const fn new(
        staging: StagingArea,
        gate: HandoffGate,
        dispatcher: TransferDispatcher,
        metrics: Metrics,
    ) -> Self {
        Self {
            staging,
            gate,
            dispatcher,
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

    /// Dispatch every batch currently staged. Returns one report per batch, in order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Staging`] if the staging area cannot be listed and
    /// [`AppError::Transfer`] if a batch cannot be read or removed.
    pub async fn forward_pending(&self) -> AppResult<Vec<DispatchReport>> {
        let batches = self
            .staging
            .list_batches()
            .map_err(|source| AppError::staging("forward.list_batches", source))?;
        if batches.is_empty() {
            debug!("no batches staged");
            return Ok(Vec::new());
        }

        info!(batches = batches.len(), "batches staged; waiting for copy to finish");
        if self.gate.wait_until_clear().await.timed_out() {
            self.metrics.inc_handoff_timeout();
        }

        let mut reports = Vec::with_capacity(batches.len());
        for batch in &batches {
            let report = self
                .dispatcher
                .dispatch(batch)
                .await
                .map_err(|source| AppError::transfer("forward.dispatch", source))?;
            self.record(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    fn record(&self, report: &DispatchReport) {
        for tally in &report.sinks {
            self.metrics.add_uploads(tally.sink, true, tally.uploaded);
            self.metrics.add_uploads(tally.sink, false, tally.failed);
        }
        if report.disposition != BatchDisposition::Vanished {
            self.metrics.inc_batch_dispatched();
        }
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
impl ScheduledTask for Forwarder {
    fn name(&self) -> &'static str {
        "forwarder"
    }

    async fn run_cycle(&mut self) -> AppResult<()> {
        let result = self.forward_pending().await.map(|_| ());
        self.publish_metrics();
        result
    }
}
