//! Test fixtures for building file trees with pinned timestamps.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use filetime::FileTime;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Scratch directory removed on drop.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn tempdir() -> anyhow::Result<TempDir> {
    tempfile::Builder::new()
        .prefix("usbrelay-")
        .tempdir()
        .context("failed to create scratch directory")
}

/// Current wall-clock time in whole seconds since the Unix epoch.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Write `contents` to `root/relative`, creating parents, and pin its access and
/// modification times to `mtime_secs`.
///
/// # Errors
///
/// Returns an error if any filesystem step fails.
pub fn write_file(
    root: &Path,
    relative: &str,
    contents: &str,
    mtime_secs: u64,
) -> anyhow::Result<PathBuf> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("failed to write '{}'", path.display()))?;
    set_mtime(&path, mtime_secs)?;
    Ok(path)
}

/// Pin the access and modification times of a file or directory.
///
/// # Errors
///
/// Returns an error if the timestamp cannot be applied.
pub fn set_mtime(path: &Path, mtime_secs: u64) -> anyhow::Result<()> {
    let seconds = i64::try_from(mtime_secs).context("timestamp out of range")?;
    let time = FileTime::from_unix_time(seconds, 0);
    filetime::set_file_times(path, time, time)
        .with_context(|| format!("failed to set times on '{}'", path.display()))
}

/// Number of regular files below `root`.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked.
pub fn count_files(root: &Path) -> anyhow::Result<usize> {
    Ok(relative_files(root)?.len())
}

/// Regular files below `root` as sorted `/`-separated relative paths.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked.
pub fn relative_files(root: &Path) -> anyhow::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk '{}'", root.display()))?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root)?;
            let parts: Vec<_> = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_pins_mtime_and_lists_relative_paths() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let path = write_file(temp.path(), "sub/b.txt", "bravo", 1_800)?;
        write_file(temp.path(), "a.txt", "alpha", 1_500)?;

        let mtime = FileTime::from_last_modification_time(&fs::metadata(&path)?);
        assert_eq!(mtime.unix_seconds(), 1_800);
        assert_eq!(relative_files(temp.path())?, ["a.txt", "sub/b.txt"]);
        assert_eq!(count_files(temp.path())?, 2);
        Ok(())
    }

    #[test]
    fn now_is_after_the_fixture_epoch() {
        assert!(now_secs() > 1_700_000_000);
    }
}
