use std::sync::Arc;

use usbrelay_transfer::{BatchDisposition, ConfiguredSink, TransferDispatcher};
use usbrelay_test_support::fixtures::{tempdir, write_file};
use usbrelay_test_support::mocks::RecordingSink;

fn configured(sink: &Arc<RecordingSink>, root: &str) -> ConfiguredSink {
    ConfiguredSink::new(sink.clone(), root)
}

#[tokio::test]
async fn every_sink_sees_every_file_before_removal() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let batch = temp.path().join("transfer").join("2000");
    write_file(&batch, "a.txt", "alpha", 1_500)?;
    write_file(&batch, "sub/b.txt", "bravo", 1_800)?;

    let cloud = Arc::new(RecordingSink::new("cloud"));
    let remote = Arc::new(RecordingSink::new("remote"));
    cloud.fail_all(true);
    remote.fail_on("sub/b.txt");

    let dispatcher = TransferDispatcher::new(
        vec![
            configured(&cloud, "/Camera"),
            configured(&remote, "pi@nas:/srv/camera/"),
        ],
        false,
    );
    let report = dispatcher.dispatch(&batch).await?;

    assert_eq!(cloud.attempts(), 2);
    assert_eq!(remote.attempts(), 2);
    assert_eq!(remote.delivered(), ["pi@nas:/srv/camera/a.txt"]);
    assert_eq!(report.files, 2);
    assert_eq!(report.failures(), 3);
    assert_eq!(report.disposition, BatchDisposition::Removed);
    assert!(!batch.exists());
    Ok(())
}

#[tokio::test]
async fn remote_paths_mirror_the_batch_layout() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let batch = temp.path().join("2000");
    write_file(&batch, "a.txt", "alpha", 1_500)?;
    write_file(&batch, "sub/b.txt", "bravo", 1_800)?;

    let sink = Arc::new(RecordingSink::new("cloud"));
    let dispatcher = TransferDispatcher::new(vec![configured(&sink, "/Camera")], false);
    dispatcher.dispatch(&batch).await?;

    assert_eq!(sink.delivered(), ["/Camera/a.txt", "/Camera/sub/b.txt"]);
    Ok(())
}

#[tokio::test]
async fn failed_batches_are_retained_when_requested() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let batch = temp.path().join("2000");
    write_file(&batch, "a.txt", "alpha", 1_500)?;

    let sink = Arc::new(RecordingSink::new("cloud"));
    sink.fail_all(true);
    let dispatcher = TransferDispatcher::new(vec![configured(&sink, "/Camera")], true);
    let report = dispatcher.dispatch(&batch).await?;

    assert_eq!(report.disposition, BatchDisposition::Retained);
    assert!(batch.join("a.txt").exists());

    sink.fail_all(false);
    let retry = dispatcher.dispatch(&batch).await?;
    assert_eq!(retry.disposition, BatchDisposition::Removed);
    assert_eq!(sink.attempts(), 2);
    assert!(!batch.exists());
    Ok(())
}

#[tokio::test]
async fn vanished_batch_is_skipped() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let sink = Arc::new(RecordingSink::new("cloud"));
    let dispatcher = TransferDispatcher::new(vec![configured(&sink, "/Camera")], false);

    let report = dispatcher.dispatch(&temp.path().join("1999")).await?;
    assert_eq!(report.disposition, BatchDisposition::Vanished);
    assert_eq!(sink.attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn batch_is_removed_even_without_sinks() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let batch = temp.path().join("2000");
    write_file(&batch, "a.txt", "alpha", 1_500)?;

    let report = TransferDispatcher::new(Vec::new(), false)
        .dispatch(&batch)
        .await?;
    assert_eq!(report.disposition, BatchDisposition::Removed);
    assert!(!batch.exists());
    Ok(())
}
