//! Retention sweep for the mounted source tree.
//!
//! # Design
//! - A single post-order walk both collects file entries and removes directories left empty.
//! - Eviction is oldest-modification-first until the file count fits the ceiling.
//! - Per-entry failures (a file or empty directory that cannot be deleted, a subtree that
//!   cannot be read) are logged and counted; the sweep carries on with the rest.
//! - The sweep root itself is never removed, even when it ends up empty.

use std::fs;
use std::path::Path;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};
use crate::model::FileEntry;

/// Outcome of a single retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files present when the walk completed.
    pub files_seen: usize,
    /// Files deleted to enforce the ceiling.
    pub files_deleted: usize,
    /// File or directory deletions that failed and were skipped.
    pub deletion_failures: usize,
    /// Entries below the root that could not be read and were left alone.
    pub entries_skipped: usize,
    /// Empty directories removed during the walk or after evictions.
    pub dirs_removed: usize,
}

impl SweepReport {
    /// Files left on the source after the sweep.
    #[must_use]
    pub const fn files_remaining(&self) -> usize {
        self.files_seen - self.files_deleted
    }
}

/// Enforces a maximum file count by evicting the oldest files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSweeper {
    max_files: usize,
}

impl RetentionSweeper {
    /// Create a sweeper that keeps at most `max_files` files.
    #[must_use]
    pub const fn new(max_files: usize) -> Self {
        Self { max_files }
    }

    /// Ceiling enforced by this sweeper.
    #[must_use]
    pub const fn max_files(&self) -> usize {
        self.max_files
    }

    /// Sweep `root`: prune empty directories, then delete the oldest files beyond the ceiling.
    ///
    /// # Errors
    ///
    /// Returns an error only when the root itself cannot be read. Failures on entries below
    /// the root are reported in [`SweepReport`] instead.
    pub fn sweep(&self, root: &Path) -> FsOpsResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut entries = collect_and_prune(root, &mut report)?;
        report.files_seen = entries.len();

        let excess = entries.len().saturating_sub(self.max_files);
        info!(
            root = %root.display(),
            files = entries.len(),
            max_files = self.max_files,
            excess,
            "retention sweep collected files"
        );
        if excess == 0 {
            return Ok(report);
        }

        entries.sort_by(|left, right| {
            left.modified
                .cmp(&right.modified)
                .then_with(|| left.path.cmp(&right.path))
        });
        for entry in entries.iter().take(excess) {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    report.files_deleted += 1;
                    info!(path = %entry.path.display(), "deleted file");
                    report.dirs_removed += prune_empty_parents(root, &entry.path);
                }
                Err(source) => {
                    report.deletion_failures += 1;
                    let error = FsOpsError::io("retention.remove_file", &entry.path, source);
                    warn!(
                        error = %error,
                        cause = ?std::error::Error::source(&error),
                        path = %entry.path.display(),
                        "failed to delete file"
                    );
                }
            }
        }
        Ok(report)
    }
}

fn collect_and_prune(root: &Path, report: &mut SweepReport) -> FsOpsResult<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(FsOpsError::walkdir("retention.walk", root, source));
            }
            Err(source) => {
                report.entries_skipped += 1;
                let path = source.path().unwrap_or(root).to_path_buf();
                warn!(error = %source, path = %path.display(), "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_dir() {
            remove_if_empty(path, report);
        } else if entry.file_type().is_file() {
            let file = entry
                .metadata()
                .map_err(|source| FsOpsError::walkdir("retention.metadata", path, source))
                .and_then(|metadata| {
                    FileEntry::from_metadata(path, &metadata)
                        .map_err(|source| FsOpsError::io("retention.file_times", path, source))
                });
            match file {
                Ok(file) => entries.push(file),
                Err(error) => {
                    report.entries_skipped += 1;
                    warn!(error = %error, path = %path.display(), "skipping unreadable file");
                }
            }
        }
    }
    Ok(entries)
}

fn remove_if_empty(path: &Path, report: &mut SweepReport) {
    match fs::read_dir(path).map(|mut children| children.next().is_none()) {
        Ok(true) => {}
        Ok(false) => return,
        Err(err) => {
            report.entries_skipped += 1;
            warn!(error = %err, path = %path.display(), "failed to inspect directory");
            return;
        }
    }
    info!(path = %path.display(), "deleting empty directory");
    match fs::remove_dir(path) {
        Ok(()) => report.dirs_removed += 1,
        Err(err) => {
            report.deletion_failures += 1;
            warn!(error = %err, path = %path.display(), "failed to delete empty directory");
        }
    }
}

fn prune_empty_parents(root: &Path, file: &Path) -> usize {
    let mut removed = 0;
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match fs::read_dir(dir).map(|mut children| children.next().is_none()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                warn!(error = %err, path = %dir.display(), "failed to inspect directory");
                break;
            }
        }
        if let Err(err) = fs::remove_dir(dir) {
            warn!(error = %err, path = %dir.display(), "failed to remove emptied directory");
            break;
        }
        info!(path = %dir.display(), "deleting emptied directory");
        removed += 1;
        current = dir.parent();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbrelay_test_support::fixtures::{count_files, tempdir, write_file};

    #[test]
    fn deletes_exactly_the_oldest_excess_files() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        for index in 0..12_u64 {
            write_file(root, &format!("file-{index:02}.jpg"), "x", 1_000 + index)?;
        }

        let report = RetentionSweeper::new(10).sweep(root)?;
        assert_eq!(report.files_seen, 12);
        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.files_remaining(), 10);
        assert!(!root.join("file-00.jpg").exists());
        assert!(!root.join("file-01.jpg").exists());
        assert!(root.join("file-02.jpg").exists());
        assert!(root.join("file-11.jpg").exists());
        Ok(())
    }

    #[test]
    fn keeps_everything_under_the_ceiling_and_prunes_empty_dirs() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        write_file(root, "DCIM/100/a.jpg", "a", 1_000)?;
        fs::create_dir_all(root.join("empty/nested/deeper"))?;

        let report = RetentionSweeper::new(10).sweep(root)?;
        assert_eq!(report.files_deleted, 0);
        assert_eq!(report.dirs_removed, 3);
        assert!(!root.join("empty").exists());
        assert!(root.join("DCIM/100/a.jpg").exists());
        Ok(())
    }

    #[test]
    fn directories_emptied_by_eviction_are_removed() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        write_file(root, "old/day/a.jpg", "a", 1_000)?;
        write_file(root, "new/b.jpg", "b", 2_000)?;

        let report = RetentionSweeper::new(1).sweep(root)?;
        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.dirs_removed, 2);
        assert!(!root.join("old").exists());
        assert!(root.join("new/b.jpg").exists());
        assert!(root.exists());
        Ok(())
    }

    #[test]
    fn zero_ceiling_clears_all_files_but_keeps_root() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        write_file(root, "a.jpg", "a", 1_000)?;
        write_file(root, "sub/b.jpg", "b", 1_100)?;

        let report = RetentionSweeper::new(0).sweep(root)?;
        assert_eq!(report.files_deleted, 2);
        assert_eq!(count_files(root)?, 0);
        assert!(root.is_dir());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn undeletable_empty_directory_does_not_stop_eviction() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir()?;
        let root = temp.path();
        write_file(root, "a.jpg", "a", 1_000)?;
        write_file(root, "b.jpg", "b", 2_000)?;
        write_file(root, "c.jpg", "c", 3_000)?;
        let locked = root.join("locked");
        fs::create_dir_all(locked.join("empty"))?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555))?;
        // Privileged users ignore directory permissions.
        let enforced = fs::create_dir(locked.join("write-check")).is_err();

        let result = RetentionSweeper::new(1).sweep(root);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
        let report = result?;

        assert_eq!(report.files_deleted, 2);
        assert!(!root.join("a.jpg").exists());
        assert!(!root.join("b.jpg").exists());
        assert!(root.join("c.jpg").exists());
        if enforced {
            assert_eq!(report.deletion_failures, 1);
            assert!(locked.join("empty").is_dir());
        }
        Ok(())
    }
}
