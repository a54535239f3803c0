//! Structure-preserving file copy into a batch directory.

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::info;

use crate::error::{FsOpsError, FsOpsResult};

/// Copy `file` (located under `source_root`) to the same relative path under `dest_root`.
///
/// Contents and permissions are copied by [`fs::copy`]; access and modification times are
/// carried over afterwards. Returns the destination path.
///
/// # Errors
///
/// Returns an error if `file` is not under `source_root`, or if any directory creation,
/// copy or timestamp update fails.
pub fn copy_with_structure(
    source_root: &Path,
    file: &Path,
    dest_root: &Path,
) -> FsOpsResult<PathBuf> {
    let target = structured_target(source_root, file, dest_root)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| FsOpsError::io("copy.create_parent", parent, source))?;
    }

    info!(
        source = %file.display(),
        destination = %target.display(),
        "copying file"
    );
    fs::copy(file, &target).map_err(|source| FsOpsError::io("copy.copy_file", &target, source))?;

    let metadata =
        fs::metadata(file).map_err(|source| FsOpsError::io("copy.source_metadata", file, source))?;
    filetime::set_file_times(
        &target,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    )
    .map_err(|source| FsOpsError::io("copy.set_times", &target, source))?;

    Ok(target)
}

/// Destination of `file` under `dest_root`, mirroring its path below `source_root`.
///
/// # Errors
///
/// Returns an error if `file` is not under `source_root`.
pub fn structured_target(
    source_root: &Path,
    file: &Path,
    dest_root: &Path,
) -> FsOpsResult<PathBuf> {
    let relative = file
        .strip_prefix(source_root)
        .map_err(|_| FsOpsError::InvalidInput {
            field: "file",
            reason: "outside_source_root",
            value: Some(file.to_string_lossy().into_owned()),
        })?;
    Ok(dest_root.join(relative))
}
