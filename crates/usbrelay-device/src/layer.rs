//! Block device layer: loop attachments and mounts.
//!
//! # Design
//! - [`LoopDeviceLayer`] is the narrow seam the pipeline talks to, so tests can swap in a fake.
//! - [`SystemDeviceLayer`] drives `losetup`, `mount` and `umount`, optionally through `sudo`.
//! - Every non-zero exit is surfaced with its status and captured stderr.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{DeviceError, DeviceResult};

/// An existing loop attachment as reported by the device layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopAttachment {
    /// Device node, e.g. `/dev/loop0`.
    pub name: String,
    /// Backing file, when the kernel still reports one.
    pub back_file: Option<PathBuf>,
}

/// Operations the relay needs from the block device layer.
#[async_trait]
pub trait LoopDeviceLayer: Send + Sync {
    /// Attach `image` to a free loop device with partition scanning, returning the device node.
    async fn attach(&self, image: &Path) -> DeviceResult<String>;

    /// List current loop attachments.
    async fn list_attachments(&self) -> DeviceResult<Vec<LoopAttachment>>;

    /// Mount `device` at `mount_point` as `filesystem_type`.
    async fn mount(&self, device: &str, mount_point: &Path, filesystem_type: &str)
    -> DeviceResult<()>;

    /// Force-unmount whatever is mounted at `mount_point`.
    async fn unmount(&self, mount_point: &Path) -> DeviceResult<()>;
}

/// Device layer backed by the util-linux command line tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemDeviceLayer {
    use_sudo: bool,
}

/// A fully resolved helper command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: &'static str,
    args: Vec<OsString>,
}

impl SystemDeviceLayer {
    /// Create a layer; privileged operations are wrapped in `sudo` when `use_sudo` is set.
    #[must_use]
    pub const fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    fn privileged(&self, tool: &'static str, args: Vec<OsString>) -> Invocation {
        if self.use_sudo {
            let mut wrapped = Vec::with_capacity(args.len() + 1);
            wrapped.push(OsString::from(tool));
            wrapped.extend(args);
            Invocation {
                program: "sudo",
                args: wrapped,
            }
        } else {
            Invocation {
                program: tool,
                args,
            }
        }
    }

    fn attach_invocation(&self, image: &Path) -> Invocation {
        self.privileged(
            "losetup",
            vec!["-fP".into(), "--show".into(), image.as_os_str().to_owned()],
        )
    }

    fn list_invocation() -> Invocation {
        Invocation {
            program: "losetup",
            args: vec!["-l".into(), "-J".into()],
        }
    }

    fn mount_invocation(
        &self,
        device: &str,
        mount_point: &Path,
        filesystem_type: &str,
    ) -> Invocation {
        self.privileged(
            "mount",
            vec![
                "-t".into(),
                filesystem_type.into(),
                device.into(),
                mount_point.as_os_str().to_owned(),
            ],
        )
    }

    fn unmount_invocation(&self, mount_point: &Path) -> Invocation {
        self.privileged("umount", vec!["-f".into(), mount_point.as_os_str().to_owned()])
    }
}

async fn run(invocation: Invocation) -> DeviceResult<Output> {
    debug!(
        program = invocation.program,
        args = ?invocation.args,
        "running device helper"
    );
    Command::new(invocation.program)
        .args(invocation.args.iter().map(OsString::as_os_str))
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| DeviceError::Spawn {
            program: invocation.program,
            source,
        })
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl LoopDeviceLayer for SystemDeviceLayer {
    async fn attach(&self, image: &Path) -> DeviceResult<String> {
        let output = run(self.attach_invocation(image)).await?;
        let device = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || device.is_empty() {
            return Err(DeviceError::Attach {
                image: image.to_path_buf(),
                status: output.status.code(),
                stderr: stderr_of(&output),
            });
        }
        info!(image = %image.display(), device = %device, "loop device attached");
        Ok(device)
    }

    async fn list_attachments(&self) -> DeviceResult<Vec<LoopAttachment>> {
        let output = run(Self::list_invocation()).await?;
        if !output.status.success() {
            return Err(DeviceError::ListAttachments {
                status: output.status.code(),
                stderr: stderr_of(&output),
            });
        }
        parse_listing(&output.stdout)
    }

    async fn mount(
        &self,
        device: &str,
        mount_point: &Path,
        filesystem_type: &str,
    ) -> DeviceResult<()> {
        let output = run(self.mount_invocation(device, mount_point, filesystem_type)).await?;
        if !output.status.success() {
            return Err(DeviceError::Mount {
                device: device.to_string(),
                mount_point: mount_point.to_path_buf(),
                status: output.status.code(),
                stderr: stderr_of(&output),
            });
        }
        Ok(())
    }

    async fn unmount(&self, mount_point: &Path) -> DeviceResult<()> {
        let output = run(self.unmount_invocation(mount_point)).await?;
        if !output.status.success() {
            return Err(DeviceError::Unmount {
                mount_point: mount_point.to_path_buf(),
                status: output.status.code(),
                stderr: stderr_of(&output),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    loopdevices: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: String,
    #[serde(rename = "back-file")]
    back_file: Option<String>,
}

/// Decode `losetup -l -J` output. An empty listing prints nothing at all.
fn parse_listing(stdout: &[u8]) -> DeviceResult<Vec<LoopAttachment>> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let listing: Listing = serde_json::from_slice(stdout)
        .map_err(|source| DeviceError::ParseAttachments { source })?;
    Ok(listing
        .loopdevices
        .into_iter()
        .map(|entry| LoopAttachment {
            name: entry.name,
            back_file: entry.back_file.map(PathBuf::from),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn args(invocation: &Invocation) -> Vec<&OsStr> {
        invocation.args.iter().map(OsString::as_os_str).collect()
    }

    #[test]
    fn privileged_commands_are_wrapped_in_sudo() {
        let layer = SystemDeviceLayer::new(true);
        let attach = layer.attach_invocation(Path::new("/piusb.bin"));
        assert_eq!(attach.program, "sudo");
        assert_eq!(args(&attach), ["losetup", "-fP", "--show", "/piusb.bin"]);

        let mount = layer.mount_invocation("/dev/loop0p1", Path::new("/mnt/usb_share"), "exfat");
        assert_eq!(
            args(&mount),
            ["mount", "-t", "exfat", "/dev/loop0p1", "/mnt/usb_share"]
        );

        let unmount = layer.unmount_invocation(Path::new("/mnt/usb_share"));
        assert_eq!(args(&unmount), ["umount", "-f", "/mnt/usb_share"]);
    }

    #[test]
    fn unprivileged_commands_run_directly() {
        let layer = SystemDeviceLayer::new(false);
        let unmount = layer.unmount_invocation(Path::new("/mnt/usb_share"));
        assert_eq!(unmount.program, "umount");
        assert_eq!(args(&unmount), ["-f", "/mnt/usb_share"]);

        let list = SystemDeviceLayer::list_invocation();
        assert_eq!(list.program, "losetup");
        assert_eq!(args(&list), ["-l", "-J"]);
    }

    #[test]
    fn listing_decodes_back_files() -> DeviceResult<()> {
        let stdout = br#"{
           "loopdevices": [
              {"name": "/dev/loop0", "sizelimit": 0, "offset": 0, "autoclear": false,
               "ro": false, "back-file": "/piusb.bin", "dio": false, "log-sec": 512},
              {"name": "/dev/loop1", "back-file": null}
           ]
        }"#;
        let attachments = parse_listing(stdout)?;
        assert_eq!(
            attachments,
            vec![
                LoopAttachment {
                    name: "/dev/loop0".to_string(),
                    back_file: Some(PathBuf::from("/piusb.bin")),
                },
                LoopAttachment {
                    name: "/dev/loop1".to_string(),
                    back_file: None,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_listing_means_no_attachments() -> DeviceResult<()> {
        assert!(parse_listing(b"\n")?.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_listing_is_reported() {
        assert!(matches!(
            parse_listing(b"{not json"),
            Err(DeviceError::ParseAttachments { .. })
        ));
    }
}
