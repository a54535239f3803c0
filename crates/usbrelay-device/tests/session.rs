use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use usbrelay_config::DeviceSettings;
use usbrelay_device::{DeviceError, DeviceMountSession};
use usbrelay_test_support::mocks::{DeviceCall, FakeDeviceLayer};

fn settings() -> DeviceSettings {
    DeviceSettings {
        usb_image: PathBuf::from("/piusb.bin"),
        mount_point: PathBuf::from("/mnt/usb_share"),
        filesystem_type: "exfat".to_string(),
        partition_suffix: "p1".to_string(),
        use_sudo: false,
        settle_delay: Duration::from_millis(500),
    }
}

#[tokio::test(start_paused = true)]
async fn existing_attachment_is_reused() -> anyhow::Result<()> {
    let layer = Arc::new(FakeDeviceLayer::with_attachment(
        "/dev/loop3",
        Path::new("/piusb.bin"),
    ));
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    assert_eq!(session.acquire().await?, "/dev/loop3p1");
    assert_eq!(session.acquire().await?, "/dev/loop3p1");
    assert_eq!(layer.attach_count(), 0);
    assert_eq!(layer.calls(), vec![DeviceCall::ListAttachments]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_attachment_is_created() -> anyhow::Result<()> {
    let layer = Arc::new(FakeDeviceLayer::with_attachment(
        "/dev/loop0",
        Path::new("/other.img"),
    ));
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    assert_eq!(session.acquire().await?, "/dev/loop1p1");
    assert_eq!(layer.attach_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn attach_failure_is_reported() {
    let layer = Arc::new(FakeDeviceLayer::new());
    layer.fail_attach(true);
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    assert!(matches!(
        session.acquire().await,
        Err(DeviceError::Attach { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn scoped_mounts_runs_body_and_unmounts() -> anyhow::Result<()> {
    let layer = Arc::new(FakeDeviceLayer::new());
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    let observed_mounted = layer.clone();
    let result = session
        .scoped(async move { Ok::<_, std::io::Error>(observed_mounted.is_mounted()) })
        .await?;

    assert!(result?);
    assert!(!layer.is_mounted());
    assert_eq!(
        layer.calls(),
        vec![
            DeviceCall::ListAttachments,
            DeviceCall::Attach(PathBuf::from("/piusb.bin")),
            DeviceCall::Mount {
                device: "/dev/loop0p1".to_string(),
                mount_point: PathBuf::from("/mnt/usb_share"),
            },
            DeviceCall::Unmount(PathBuf::from("/mnt/usb_share")),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn body_failure_still_unmounts() -> anyhow::Result<()> {
    let layer = Arc::new(FakeDeviceLayer::new());
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    let result = session
        .scoped(async { Err::<(), _>(std::io::Error::other("copy failed")) })
        .await?;

    assert!(result.is_err());
    assert_eq!(layer.unmount_count(), 1);
    assert!(!layer.is_mounted());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn mount_failure_skips_body_and_unmount() {
    let layer = Arc::new(FakeDeviceLayer::new());
    layer.fail_mount(true);
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    let ran = Arc::new(AtomicBool::new(false));
    let body_ran = ran.clone();
    let result = session
        .scoped(async move {
            body_ran.store(true, Ordering::SeqCst);
            Ok::<_, std::io::Error>(())
        })
        .await;

    assert!(matches!(result, Err(DeviceError::Mount { .. })));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(layer.unmount_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unmount_failure_wins_over_body_result() {
    let layer = Arc::new(FakeDeviceLayer::new());
    layer.fail_unmount(true);
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    let result = session
        .scoped(async { Err::<(), _>(std::io::Error::other("copy failed")) })
        .await;

    assert!(matches!(result, Err(DeviceError::Unmount { .. })));
    assert_eq!(layer.unmount_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn settle_delay_follows_mount_and_unmount() -> anyhow::Result<()> {
    let layer = Arc::new(FakeDeviceLayer::new());
    let mut session = DeviceMountSession::new(layer.clone(), &settings());

    let started = tokio::time::Instant::now();
    session.scoped(async { Ok::<_, std::io::Error>(()) }).await??;
    assert!(started.elapsed() >= Duration::from_secs(1));
    Ok(())
}
