//! Remote sink abstraction and destination path composition.

use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{TransferError, TransferResult};

/// A remote destination that accepts one file at a time.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Upload `local` to `remote`, a fully composed destination path.
    async fn upload(&self, local: &Path, remote: &str) -> TransferResult<()>;
}

/// A sink paired with the remote root its destinations are composed under.
#[derive(Clone)]
pub struct ConfiguredSink {
    sink: Arc<dyn Sink>,
    remote_root: String,
}

impl fmt::Debug for ConfiguredSink {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConfiguredSink")
            .field("sink", &self.sink.name())
            .field("remote_root", &self.remote_root)
            .finish()
    }
}

impl ConfiguredSink {
    /// Pair `sink` with `remote_root`.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>, remote_root: impl Into<String>) -> Self {
        Self {
            sink,
            remote_root: remote_root.into(),
        }
    }

    /// Label of the wrapped sink.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.sink.name()
    }

    /// Remote root destinations are composed under.
    #[must_use]
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Upload `local` to `remote` through the wrapped sink.
    ///
    /// # Errors
    ///
    /// Propagates the sink's failure.
    pub async fn upload(&self, local: &Path, remote: &str) -> TransferResult<()> {
        self.sink.upload(local, remote).await
    }
}

/// Join `relative` under `remote_root` with exactly one `/` between them.
#[must_use]
pub fn compose_remote_path(remote_root: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        remote_root.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Path of `file` relative to `batch`, `/`-separated.
///
/// # Errors
///
/// Returns an error if `file` is not strictly inside `batch`.
pub fn relative_remote_path(batch: &Path, file: &Path) -> TransferResult<String> {
    let invalid = || TransferError::InvalidInput {
        field: "file",
        reason: "outside_batch",
        value: Some(file.to_string_lossy().into_owned()),
    };
    let relative = file.strip_prefix(batch).map_err(|_| invalid())?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return Err(invalid()),
        }
    }
    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}
