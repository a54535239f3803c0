//! Point-in-time change detection over the mounted source tree.
//!
//! # Design
//! - Only the most recently modified subdirectories of each level are descended into; older
//!   branches are assumed to hold nothing new, which bounds scan cost on slow media.
//! - A file qualifies when the later of its modification and status change times is strictly
//!   newer than the watermark.
//! - Read-only: the scanner never touches the tree it inspects.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::{FsOpsError, FsOpsResult};
use crate::model::{FileEntry, Watermark};

/// Finds files changed after a watermark using a bounded recent-directory walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeScanner {
    recent_dir_depth: usize,
}

impl ChangeScanner {
    /// Create a scanner that descends into at most `recent_dir_depth` subdirectories per level.
    #[must_use]
    pub const fn new(recent_dir_depth: usize) -> Self {
        Self { recent_dir_depth }
    }

    /// Number of subdirectories descended into per level.
    #[must_use]
    pub const fn recent_dir_depth(&self) -> usize {
        self.recent_dir_depth
    }

    /// Collect every file under `root` changed after `watermark`.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be listed or an entry cannot be inspected.
    pub fn scan(&self, root: &Path, watermark: Watermark) -> FsOpsResult<BTreeSet<PathBuf>> {
        let mut changed = BTreeSet::new();
        self.scan_dir(root, watermark, &mut changed)?;
        debug!(
            root = %root.display(),
            watermark = watermark.unix_seconds(),
            changed = changed.len(),
            "change scan complete"
        );
        Ok(changed)
    }

    fn scan_dir(
        &self,
        dir: &Path,
        watermark: Watermark,
        changed: &mut BTreeSet<PathBuf>,
    ) -> FsOpsResult<()> {
        let entries =
            fs::read_dir(dir).map_err(|source| FsOpsError::io("scan.read_dir", dir, source))?;

        let mut directories: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| FsOpsError::io("scan.read_entry", dir, source))?;
            let path = entry.path();
            let metadata = entry
                .metadata()
                .map_err(|source| FsOpsError::io("scan.metadata", &path, source))?;
            if metadata.is_file() {
                let file = FileEntry::from_metadata(&path, &metadata)
                    .map_err(|source| FsOpsError::io("scan.file_times", &path, source))?;
                if watermark.is_exceeded_by(file.latest_change()) {
                    changed.insert(file.path);
                }
            } else if metadata.is_dir() {
                let modified = metadata
                    .modified()
                    .map_err(|source| FsOpsError::io("scan.dir_times", &path, source))?;
                directories.push((modified, path));
            }
        }

        directories.sort_by(|left, right| right.0.cmp(&left.0));
        for (_, directory) in directories.into_iter().take(self.recent_dir_depth) {
            self.scan_dir(&directory, watermark, changed)?;
        }
        Ok(())
    }
}
