//! In-memory fakes for the device layer and remote sinks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use usbrelay_device::{DeviceError, DeviceResult, LoopAttachment, LoopDeviceLayer};
use usbrelay_transfer::{Sink, TransferError, TransferResult};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call observed by [`FakeDeviceLayer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    /// `attach(image)`.
    Attach(PathBuf),
    /// `list_attachments()`.
    ListAttachments,
    /// `mount(device, mount_point, filesystem_type)`.
    Mount {
        /// Device passed to mount.
        device: String,
        /// Mount point passed to mount.
        mount_point: PathBuf,
    },
    /// `unmount(mount_point)`.
    Unmount(PathBuf),
}

/// Device layer that records calls and never touches the system.
#[derive(Debug, Default)]
pub struct FakeDeviceLayer {
    calls: Mutex<Vec<DeviceCall>>,
    attachments: Mutex<Vec<LoopAttachment>>,
    mounted: AtomicBool,
    fail_attach: AtomicBool,
    fail_mount: AtomicBool,
    fail_unmount: AtomicBool,
}

impl FakeDeviceLayer {
    /// Fake with no existing attachments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake that already has `image` attached as `device`.
    #[must_use]
    pub fn with_attachment(device: &str, image: &Path) -> Self {
        let fake = Self::default();
        locked(&fake.attachments).push(LoopAttachment {
            name: device.to_string(),
            back_file: Some(image.to_path_buf()),
        });
        fake
    }

    /// Make subsequent attach calls fail.
    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent mount calls fail.
    pub fn fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent unmount calls fail.
    pub fn fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<DeviceCall> {
        locked(&self.calls).clone()
    }

    /// Number of mount calls observed.
    #[must_use]
    pub fn mount_count(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Mount { .. }))
    }

    /// Number of unmount calls observed.
    #[must_use]
    pub fn unmount_count(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Unmount(_)))
    }

    /// Number of attach calls observed.
    #[must_use]
    pub fn attach_count(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Attach(_)))
    }

    /// Whether a successful mount has not yet been followed by a successful unmount.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn count(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        locked(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: DeviceCall) {
        locked(&self.calls).push(call);
    }
}

#[async_trait]
impl LoopDeviceLayer for FakeDeviceLayer {
    async fn attach(&self, image: &Path) -> DeviceResult<String> {
        self.record(DeviceCall::Attach(image.to_path_buf()));
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(DeviceError::Attach {
                image: image.to_path_buf(),
                status: Some(1),
                stderr: "injected attach failure".to_string(),
            });
        }
        let mut attachments = locked(&self.attachments);
        let name = format!("/dev/loop{}", attachments.len());
        attachments.push(LoopAttachment {
            name: name.clone(),
            back_file: Some(image.to_path_buf()),
        });
        Ok(name)
    }

    async fn list_attachments(&self) -> DeviceResult<Vec<LoopAttachment>> {
        self.record(DeviceCall::ListAttachments);
        Ok(locked(&self.attachments).clone())
    }

    async fn mount(
        &self,
        device: &str,
        mount_point: &Path,
        _filesystem_type: &str,
    ) -> DeviceResult<()> {
        self.record(DeviceCall::Mount {
            device: device.to_string(),
            mount_point: mount_point.to_path_buf(),
        });
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(DeviceError::Mount {
                device: device.to_string(),
                mount_point: mount_point.to_path_buf(),
                status: Some(32),
                stderr: "injected mount failure".to_string(),
            });
        }
        self.mounted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unmount(&self, mount_point: &Path) -> DeviceResult<()> {
        self.record(DeviceCall::Unmount(mount_point.to_path_buf()));
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(DeviceError::Unmount {
                mount_point: mount_point.to_path_buf(),
                status: Some(32),
                stderr: "injected unmount failure".to_string(),
            });
        }
        self.mounted.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// An upload observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    /// Local file handed to the sink.
    pub local: PathBuf,
    /// Composed remote destination.
    pub remote: String,
    /// Whether the sink reported success.
    pub succeeded: bool,
}

/// Sink that records every upload and fails on request.
#[derive(Debug)]
pub struct RecordingSink {
    name: &'static str,
    uploads: Mutex<Vec<RecordedUpload>>,
    failing_suffixes: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingSink {
    /// Sink labelled `name`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            uploads: Mutex::new(Vec::new()),
            failing_suffixes: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail uploads whose remote path ends with `suffix`.
    pub fn fail_on(&self, suffix: &str) {
        locked(&self.failing_suffixes).insert(suffix.to_string());
    }

    /// Fail every upload.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Number of upload attempts, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every upload observed so far, in order.
    #[must_use]
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        locked(&self.uploads).clone()
    }

    /// Remote destinations of successful uploads.
    #[must_use]
    pub fn delivered(&self) -> Vec<String> {
        locked(&self.uploads)
            .iter()
            .filter(|upload| upload.succeeded)
            .map(|upload| upload.remote.clone())
            .collect()
    }

    fn should_fail(&self, remote: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst)
            || locked(&self.failing_suffixes)
                .iter()
                .any(|suffix| remote.ends_with(suffix.as_str()))
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn upload(&self, local: &Path, remote: &str) -> TransferResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let succeeded = !self.should_fail(remote) && local.is_file();
        locked(&self.uploads).push(RecordedUpload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            succeeded,
        });
        if succeeded {
            Ok(())
        } else {
            Err(TransferError::Upload {
                sink: self.name,
                path: local.to_path_buf(),
                reason: "injected upload failure".to_string(),
            })
        }
    }
}
