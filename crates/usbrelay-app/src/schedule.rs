//! Timer-driven invocation of a daemon's cycle.
//!
//! # Design
//! - A [`ScheduledTask`] does one unit of work per call; a [`Ticker`] decides when, and
//!   whether, the next call happens. Production uses [`SleepTicker`]; tests drive the loop
//!   with [`CountedTicker`] and never sleep.
//! - Work runs first and the wait follows, so a freshly started daemon acts immediately.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::AppResult;

/// Decides when the next cycle may start.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next cycle; `false` ends the schedule.
    async fn tick(&mut self) -> bool;
}

/// Unit of periodic work.
#[async_trait]
pub trait ScheduledTask: Send {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// Run one cycle.
    async fn run_cycle(&mut self) -> AppResult<()>;
}

/// Sleeps a fixed period between cycles, forever.
#[derive(Debug, Clone, Copy)]
pub struct SleepTicker {
    period: Duration,
}

impl SleepTicker {
    /// Ticker that pauses `period` after every cycle.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Pause between cycles.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl Ticker for SleepTicker {
    async fn tick(&mut self) -> bool {
        tokio::time::sleep(self.period).await;
        true
    }
}

/// Allows a fixed number of further cycles without waiting.
#[derive(Debug, Clone, Copy)]
pub struct CountedTicker {
    remaining: usize,
}

impl CountedTicker {
    /// Ticker that permits `remaining` cycles after the first.
    #[must_use]
    pub const fn new(remaining: usize) -> Self {
        Self { remaining }
    }
}

#[async_trait]
impl Ticker for CountedTicker {
    async fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Run `task` until `ticker` stops the schedule or a cycle fails fatally.
///
/// Returns the number of cycles started. Errors for which
/// [`crate::AppError::is_cycle_local`] holds are logged and the schedule continues.
///
/// # Errors
///
/// Returns the first error that is not confined to a single cycle.
pub async fn run_scheduled<T, K>(task: &mut T, ticker: &mut K) -> AppResult<usize>
where
    T: ScheduledTask + ?Sized,
    K: Ticker + ?Sized,
{
    let mut cycles = 0_usize;
    loop {
        cycles += 1;
        debug!(task = task.name(), cycle = cycles, "cycle starting");
        match task.run_cycle().await {
            Ok(()) => {}
            Err(err) if err.is_cycle_local() => {
                warn!(
                    task = task.name(),
                    operation = err.operation(),
                    error = ?err,
                    "cycle failed; retrying on the next tick"
                );
            }
            Err(err) => return Err(err),
        }
        if !ticker.tick().await {
            return Ok(cycles);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::io;

    struct ScriptedTask {
        results: Vec<AppResult<()>>,
        runs: usize,
    }

    #[async_trait]
    impl ScheduledTask for ScriptedTask {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run_cycle(&mut self) -> AppResult<()> {
            self.runs += 1;
            if self.results.is_empty() {
                Ok(())
            } else {
                self.results.remove(0)
            }
        }
    }

    fn cycle_error() -> AppError {
        AppError::copy(
            "copy.batch",
            usbrelay_fsops::FsOpsError::InvalidInput {
                field: "file",
                reason: "outside_source_root",
                value: None,
            },
        )
    }

    #[tokio::test]
    async fn counted_ticker_bounds_the_schedule() -> AppResult<()> {
        let mut task = ScriptedTask {
            results: Vec::new(),
            runs: 0,
        };
        let cycles = run_scheduled(&mut task, &mut CountedTicker::new(2)).await?;
        assert_eq!(cycles, 3);
        assert_eq!(task.runs, 3);
        Ok(())
    }

    #[tokio::test]
    async fn cycle_errors_do_not_stop_the_schedule() -> AppResult<()> {
        let mut task = ScriptedTask {
            results: vec![Err(cycle_error()), Ok(())],
            runs: 0,
        };
        let cycles = run_scheduled(&mut task, &mut CountedTicker::new(1)).await?;
        assert_eq!(cycles, 2);
        Ok(())
    }

    #[tokio::test]
    async fn fatal_errors_end_the_schedule() {
        let mut task = ScriptedTask {
            results: vec![
                Ok(()),
                Err(AppError::io(
                    "pipeline.stat_image",
                    "/piusb.bin",
                    io::Error::other("gone"),
                )),
            ],
            runs: 0,
        };
        let result = run_scheduled(&mut task, &mut CountedTicker::new(5)).await;
        assert!(matches!(result, Err(AppError::Io { .. })));
        assert_eq!(task.runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_ticker_waits_the_full_period() {
        let mut ticker = SleepTicker::new(Duration::from_millis(4_500));
        let started = tokio::time::Instant::now();
        assert!(ticker.tick().await);
        assert!(started.elapsed() >= Duration::from_millis(4_500));
        assert_eq!(ticker.period(), Duration::from_millis(4_500));
    }
}
