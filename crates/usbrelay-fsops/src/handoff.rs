//! Cross-process handoff between the poller and the forwarder.
//!
//! # Design
//! - The copy marker is a single-slot advisory lock expressed as a zero-length file. The
//!   poller holds it while writing a batch; the forwarder waits for it to disappear.
//! - A marker found at acquisition time is treated as left over from a crashed run: it is
//!   logged, removed and recreated.
//! - Releasing is explicit. Dropping a guard without releasing leaves the marker in place, the
//!   same state a crash mid-copy produces.
//! - Waiting is bounded; a marker that never clears is logged and then ignored so a stale file
//!   cannot wedge transfers forever.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::{FsOpsError, FsOpsResult};

/// Interval between marker checks while waiting for a copy to finish.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Advisory lock backed by the copy-in-progress marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyLock {
    marker: PathBuf,
}

impl CopyLock {
    /// Lock backed by the marker at `marker`.
    #[must_use]
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Location of the marker file.
    #[must_use]
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Whether the marker is currently present.
    #[must_use]
    pub fn is_held(&self) -> bool {
        marker_present(&self.marker)
    }

    /// Take the lock, stealing a stale marker if one is present.
    ///
    /// # Errors
    ///
    /// Returns an error if a stale marker cannot be removed or the new marker cannot be created.
    pub fn acquire(&self) -> FsOpsResult<CopyLockGuard> {
        if self.is_held() {
            warn!(
                marker = %self.marker.display(),
                "copy marker already exists; removing it to continue"
            );
            remove_marker(&self.marker, "handoff.remove_stale_marker")?;
        }
        if let Some(parent) = self.marker.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| FsOpsError::io("handoff.create_parent", parent, source))?;
        }
        File::create(&self.marker)
            .map_err(|source| FsOpsError::io("handoff.create_marker", &self.marker, source))?;
        debug!(marker = %self.marker.display(), "copy marker set");
        Ok(CopyLockGuard {
            marker: self.marker.clone(),
        })
    }
}

/// Proof that the copy marker is held by this process.
#[derive(Debug)]
#[must_use = "the marker stays in place until the guard is released"]
pub struct CopyLockGuard {
    marker: PathBuf,
}

impl CopyLockGuard {
    /// Location of the held marker file.
    #[must_use]
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Remove the marker. A marker that is already gone counts as released.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be removed.
    pub fn release(self) -> FsOpsResult<()> {
        remove_marker(&self.marker, "handoff.release_marker")?;
        debug!(marker = %self.marker.display(), "copy marker cleared");
        Ok(())
    }
}

/// Result of waiting for the copy marker to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// The marker was absent after `polls` waits.
    Clear {
        /// Number of poll intervals slept before the marker disappeared.
        polls: u32,
    },
    /// The marker was still present when the timeout elapsed.
    TimedOut,
}

impl HandoffOutcome {
    /// Whether the wait ended because the timeout elapsed.
    #[must_use]
    pub const fn timed_out(self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Forwarder-side wait for the poller's copy marker to disappear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffGate {
    marker: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl HandoffGate {
    /// Gate on `marker`, giving up after `timeout`.
    #[must_use]
    pub fn new(marker: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            marker: marker.into(),
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the interval between checks.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Marker path being watched.
    #[must_use]
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Poll until the marker is absent or the timeout elapses.
    pub async fn wait_until_clear(&self) -> HandoffOutcome {
        let deadline = Instant::now() + self.timeout;
        let mut polls = 0_u32;
        loop {
            if !marker_present(&self.marker) {
                if polls > 0 {
                    info!(polls, "copy finished; continuing with transfer");
                }
                return HandoffOutcome::Clear { polls };
            }
            if Instant::now() >= deadline {
                warn!(
                    marker = %self.marker.display(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "copy marker still present after timeout; continuing anyway"
                );
                return HandoffOutcome::TimedOut;
            }
            if polls == 0 {
                info!(marker = %self.marker.display(), "copy in progress; waiting");
            }
            sleep(self.poll_interval).await;
            polls = polls.saturating_add(1);
        }
    }
}

fn marker_present(marker: &Path) -> bool {
    fs::symlink_metadata(marker).is_ok()
}

fn remove_marker(marker: &Path, operation: &'static str) -> FsOpsResult<()> {
    match fs::remove_file(marker) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(FsOpsError::io(operation, marker, source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbrelay_test_support::fixtures::tempdir;

    #[test]
    fn acquire_and_release_toggle_the_marker() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let lock = CopyLock::new(temp.path().join("transfer").join("copyingActive"));
        assert!(!lock.is_held());

        let guard = lock.acquire()?;
        assert!(lock.is_held());
        assert_eq!(fs::metadata(guard.marker())?.len(), 0);

        guard.release()?;
        assert!(!lock.is_held());
        Ok(())
    }

    #[test]
    fn stale_marker_is_stolen() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let marker = temp.path().join("copyingActive");
        fs::write(&marker, "left over from a crash")?;

        let lock = CopyLock::new(&marker);
        let guard = lock.acquire()?;
        assert_eq!(fs::metadata(&marker)?.len(), 0);
        guard.release()?;
        assert!(!marker.exists());
        Ok(())
    }

    #[test]
    fn dropped_guard_leaves_marker_behind() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let lock = CopyLock::new(temp.path().join("copyingActive"));
        drop(lock.acquire()?);
        assert!(lock.is_held());
        Ok(())
    }

    #[test]
    fn releasing_a_vanished_marker_is_ok() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let lock = CopyLock::new(temp.path().join("copyingActive"));
        let guard = lock.acquire()?;
        fs::remove_file(lock.marker())?;
        guard.release()?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn absent_marker_clears_immediately() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let gate = HandoffGate::new(temp.path().join("copyingActive"), Duration::from_secs(30));
        assert_eq!(gate.wait_until_clear().await, HandoffOutcome::Clear { polls: 0 });
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn marker_cleared_after_five_seconds_is_not_a_timeout() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let marker = temp.path().join("copyingActive");
        fs::write(&marker, "")?;

        let remover_marker = marker.clone();
        let remover = tokio::spawn(async move {
            sleep(Duration::from_millis(4_500)).await;
            fs::remove_file(remover_marker)
        });

        let gate = HandoffGate::new(&marker, Duration::from_secs(30));
        let started = Instant::now();
        let outcome = gate.wait_until_clear().await;
        remover.await??;

        assert_eq!(outcome, HandoffOutcome::Clear { polls: 5 });
        assert!(started.elapsed() < Duration::from_secs(30));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn lingering_marker_times_out() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let marker = temp.path().join("copyingActive");
        fs::write(&marker, "")?;

        let gate = HandoffGate::new(&marker, Duration::from_secs(30));
        let started = Instant::now();
        let outcome = gate.wait_until_clear().await;
        assert!(outcome.timed_out());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(marker.exists());
        Ok(())
    }
}
