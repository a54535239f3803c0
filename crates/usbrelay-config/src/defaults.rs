//! Default locations and timings for the relay daemons.
//!
//! # Design
//! - Centralize the constants both daemons agree on (staging layout, marker name).
//! - Keep time-based defaults explicit so deployments can audit them.

/// Backing image exported through the USB gadget.
pub(crate) const USB_IMAGE: &str = "/piusb.bin";
/// Mount point used while the poller reads the image.
pub(crate) const MOUNT_POINT: &str = "/mnt/usb_share";
/// Filesystem type passed to `mount -t`.
pub(crate) const FILESYSTEM_TYPE: &str = "exfat";
/// Partition suffix appended to the loop device name.
pub(crate) const PARTITION_SUFFIX: &str = "p1";
/// Number of most recently modified directories recursed into per level.
pub(crate) const RECENT_DIR_DEPTH: usize = 2;
/// Seconds the forwarder sleeps between staging scans.
pub(crate) const FORWARDER_CYCLE_SECS: f64 = 4.5;
/// Seconds the forwarder waits for an active copy to finish.
pub(crate) const HANDOFF_TIMEOUT_SECS: f64 = 30.0;
/// Seconds to pause after mount/unmount for the kernel to settle.
pub(crate) const SETTLE_DELAY_SECS: f64 = 0.5;
/// Staging directory name under the base directory.
pub(crate) const TRANSFER_DIR_NAME: &str = "transfer";
/// Log directory name under the base directory.
pub(crate) const LOG_DIR_NAME: &str = "logs";
/// Configuration document name under the base directory.
pub(crate) const CONFIG_FILE_NAME: &str = "config.json";
