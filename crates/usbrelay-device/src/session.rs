//! Scoped access to the mounted USB image.
//!
//! # Design
//! - The loop attachment is resolved once and cached; an attachment that already maps the
//!   image is reused instead of creating a second one.
//! - [`DeviceMountSession::scoped`] mounts, runs the caller's body, then always attempts the
//!   unmount, whatever the body returned.
//! - Each mount and unmount is followed by a settle delay for the kernel to finish up.

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use usbrelay_config::DeviceSettings;

use crate::error::DeviceResult;
use crate::layer::LoopDeviceLayer;

/// Mount session over a loop-attached disk image.
pub struct DeviceMountSession {
    layer: Arc<dyn LoopDeviceLayer>,
    image: PathBuf,
    partition_suffix: String,
    mount_point: PathBuf,
    filesystem_type: String,
    settle_delay: Duration,
    device: Option<String>,
}

impl std::fmt::Debug for DeviceMountSession {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DeviceMountSession")
            .field("image", &self.image)
            .field("mount_point", &self.mount_point)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl DeviceMountSession {
    /// Build a session from the configured device settings.
    #[must_use]
    pub fn new(layer: Arc<dyn LoopDeviceLayer>, settings: &DeviceSettings) -> Self {
        Self {
            layer,
            image: settings.usb_image.clone(),
            partition_suffix: settings.partition_suffix.clone(),
            mount_point: settings.mount_point.clone(),
            filesystem_type: settings.filesystem_type.clone(),
            settle_delay: settings.settle_delay,
            device: None,
        }
    }

    /// Backing image path.
    #[must_use]
    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Directory the partition is mounted on.
    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Resolve the partition device for the image, attaching it if no attachment exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DeviceError::ListAttachments`] or [`crate::DeviceError::Attach`] when
    /// the device layer fails.
    pub async fn acquire(&mut self) -> DeviceResult<&str> {
        let device = match self.device.take() {
            Some(device) => device,
            None => self.resolve_device().await?,
        };
        Ok(self.device.insert(device).as_str())
    }

    async fn resolve_device(&self) -> DeviceResult<String> {
        let existing = self
            .layer
            .list_attachments()
            .await?
            .into_iter()
            .find(|attachment| attachment.back_file.as_deref() == Some(self.image.as_path()));
        let loop_device = match existing {
            Some(attachment) => {
                debug!(device = %attachment.name, "reusing existing loop attachment");
                attachment.name
            }
            None => self.layer.attach(&self.image).await?,
        };
        let partition = format!("{loop_device}{}", self.partition_suffix);
        info!(image = %self.image.display(), device = %partition, "loop device ready");
        Ok(partition)
    }

    /// Mount the image, await `body`, then unmount regardless of the body's outcome.
    ///
    /// The outer result carries device failures; the inner result is the body's own. When
    /// both the body and the unmount fail, the body error is logged and the unmount error is
    /// returned, since a lingering mount is the more serious condition.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be acquired, mounted or unmounted. The body is not
    /// polled when the mount fails.
    pub async fn scoped<F, T, E>(&mut self, body: F) -> DeviceResult<Result<T, E>>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let device = self.acquire().await?.to_string();
        self.layer
            .mount(&device, &self.mount_point, &self.filesystem_type)
            .await?;
        debug!(device = %device, mount_point = %self.mount_point.display(), "mounted");
        self.settle().await;

        let outcome = body.await;

        let unmounted = self.layer.unmount(&self.mount_point).await;
        self.settle().await;
        match unmounted {
            Ok(()) => {
                debug!(mount_point = %self.mount_point.display(), "unmounted");
                Ok(outcome)
            }
            Err(unmount_error) => {
                if let Err(body_error) = &outcome {
                    error!(error = %body_error, "mounted work failed before unmount error");
                }
                Err(unmount_error)
            }
        }
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}
