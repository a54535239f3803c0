//! Domain models for the relay filesystem primitives.
//!
//! # Design
//! - Keep scan results lightweight and copyable where possible.
//! - Avoid embedding IO handles; entries are snapshots of metadata taken during a walk.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Snapshot of a file observed during a directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Last modification time.
    pub modified: SystemTime,
    /// Last status change time (inode change on unix).
    pub changed: SystemTime,
    /// Size in bytes.
    pub len: u64,
}

impl FileEntry {
    /// Build an entry from metadata already fetched for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform does not report a modification time.
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> io::Result<Self> {
        let modified = metadata.modified()?;
        Ok(Self {
            path: path.to_path_buf(),
            modified,
            changed: status_change_time(metadata).unwrap_or(modified),
            len: metadata.len(),
        })
    }

    /// The later of the modification and status change times.
    #[must_use]
    pub fn latest_change(&self) -> SystemTime {
        self.modified.max(self.changed)
    }
}

#[cfg(unix)]
fn status_change_time(metadata: &Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;

    let seconds = u64::try_from(metadata.ctime()).ok()?;
    let nanos = u32::try_from(metadata.ctime_nsec()).ok()?;
    UNIX_EPOCH.checked_add(Duration::new(seconds, nanos))
}

#[cfg(not(unix))]
fn status_change_time(metadata: &Metadata) -> Option<SystemTime> {
    metadata.created().ok()
}

/// Last image modification time known to have been fully copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(SystemTime);

impl Watermark {
    /// Wrap an observed modification time.
    #[must_use]
    pub const fn new(time: SystemTime) -> Self {
        Self(time)
    }

    /// Watermark at a whole number of seconds since the Unix epoch.
    #[must_use]
    pub fn from_unix_seconds(seconds: u64) -> Self {
        Self(UNIX_EPOCH + Duration::from_secs(seconds))
    }

    /// Underlying time value.
    #[must_use]
    pub const fn time(self) -> SystemTime {
        self.0
    }

    /// Whole seconds since the Unix epoch, truncated; pre-epoch times map to zero.
    #[must_use]
    pub fn unix_seconds(self) -> u64 {
        self.0
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }

    /// Whether `time` is strictly newer than the watermark.
    #[must_use]
    pub fn is_exceeded_by(self, time: SystemTime) -> bool {
        time > self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_comparison_is_strict() {
        let watermark = Watermark::from_unix_seconds(1_000);
        assert!(!watermark.is_exceeded_by(UNIX_EPOCH + Duration::from_secs(1_000)));
        assert!(watermark.is_exceeded_by(UNIX_EPOCH + Duration::from_millis(1_000_001)));
        assert!(!watermark.is_exceeded_by(UNIX_EPOCH + Duration::from_secs(999)));
    }

    #[test]
    fn unix_seconds_truncates_fractions() {
        let watermark = Watermark::new(UNIX_EPOCH + Duration::from_millis(2_000_750));
        assert_eq!(watermark.unix_seconds(), 2_000);
        assert_eq!(Watermark::new(UNIX_EPOCH).unix_seconds(), 0);
    }

    #[test]
    fn latest_change_prefers_newer_timestamp() {
        let entry = FileEntry {
            path: PathBuf::from("a.txt"),
            modified: UNIX_EPOCH + Duration::from_secs(1_500),
            changed: UNIX_EPOCH + Duration::from_secs(1_700),
            len: 3,
        };
        assert_eq!(entry.latest_change(), UNIX_EPOCH + Duration::from_secs(1_700));
    }
}
