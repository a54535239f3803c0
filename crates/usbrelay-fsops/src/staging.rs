//! Layout of the local staging area shared by the poller and the forwarder.
//!
//! ```text
//! <root>/copyingActive        copy-in-progress marker
//! <root>/<unix seconds>/...   one batch per copy cycle, mirroring the source tree
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;
use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};
use crate::handoff::{CopyLock, HandoffGate};
use crate::model::Watermark;

/// File name of the copy-in-progress marker inside the staging root.
pub const MARKER_FILE_NAME: &str = "copyingActive";

/// Handle on the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Staging area rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the staging area.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_exists(&self) -> FsOpsResult<()> {
        fs::create_dir_all(&self.root)
            .map_err(|source| FsOpsError::io("staging.create_root", &self.root, source))
    }

    /// Path of the global copy marker.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE_NAME)
    }

    /// Lock over the copy marker, used by the poller.
    #[must_use]
    pub fn copy_lock(&self) -> CopyLock {
        CopyLock::new(self.marker_path())
    }

    /// Gate over the copy marker, used by the forwarder.
    #[must_use]
    pub fn handoff_gate(&self, timeout: Duration) -> HandoffGate {
        HandoffGate::new(self.marker_path(), timeout)
    }

    /// Directory for the batch produced when the image reached `image_time`.
    #[must_use]
    pub fn batch_path(&self, image_time: Watermark) -> PathBuf {
        self.root.join(image_time.unix_seconds().to_string())
    }

    /// Batch directories currently present, oldest name first.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging root cannot be listed.
    pub fn list_batches(&self) -> FsOpsResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|source| FsOpsError::io("staging.list_batches", &self.root, source))?;
        let mut batches = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|source| FsOpsError::io("staging.list_batches", &self.root, source))?;
            let file_type = entry
                .file_type()
                .map_err(|source| FsOpsError::io("staging.batch_type", entry.path(), source))?;
            if file_type.is_dir() {
                batches.push(entry.path());
            }
        }
        // Numeric names: shorter first, then lexical.
        batches.sort_by(|left, right| {
            let left = left.file_name().unwrap_or_default();
            let right = right.file_name().unwrap_or_default();
            left.len().cmp(&right.len()).then_with(|| left.cmp(right))
        });
        Ok(batches)
    }

    /// Regular files inside `batch`, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be traversed.
    pub fn batch_files(batch: &Path) -> FsOpsResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(batch).min_depth(1).sort_by_file_name() {
            let entry =
                entry.map_err(|source| FsOpsError::walkdir("staging.batch_walk", batch, source))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Remove a batch directory and everything in it. A missing batch is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn discard_batch(batch: &Path) -> FsOpsResult<()> {
        match fs::remove_dir_all(batch) {
            Ok(()) => {
                info!(batch = %batch.display(), "batch removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FsOpsError::io("staging.discard_batch", batch, source)),
        }
    }

    /// Roll back a failed copy into `batch`: delete `targets`, then every directory inside the
    /// batch (and the batch itself) that is left empty. Content already in the batch from an
    /// earlier copy is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if a target or an emptied directory exists but cannot be removed.
    pub fn discard_partial(batch: &Path, targets: &[PathBuf]) -> FsOpsResult<()> {
        let mut dirs = BTreeSet::new();
        for target in targets {
            match fs::remove_file(target) {
                Ok(()) => info!(path = %target.display(), "partial copy removed"),
                Err(err) if is_absent(&err) => {}
                Err(source) => {
                    return Err(FsOpsError::io("staging.discard_partial", target, source));
                }
            }
            let mut current = target.parent();
            while let Some(dir) = current.filter(|dir| dir.starts_with(batch)) {
                dirs.insert(dir.to_path_buf());
                current = dir.parent();
            }
        }
        // Deepest first so parents are empty by the time they are reached.
        for dir in dirs.iter().rev() {
            match fs::remove_dir(dir) {
                Ok(()) => info!(path = %dir.display(), "emptied batch directory removed"),
                Err(err) if is_absent(&err) || err.kind() == io::ErrorKind::DirectoryNotEmpty => {}
                Err(source) => {
                    return Err(FsOpsError::io("staging.discard_partial", dir, source));
                }
            }
        }
        Ok(())
    }
}

fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
