//! Asset reference counting and removal scenarios

use reclog_common::{remove_all_recordings, remove_recording, LogEntry, RecordingStatus};
use reclog_e2e::{expect_recordings, Workspace};

#[tokio::test]
async fn test_shared_sourcemap_outlives_first_removal() {
    let ws = Workspace::new().unwrap();
    let data_a = ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    let data_b = ws.add_on_disk("B", "linux-chromium-1", 8).await.unwrap();
    let shared = ws.add_sourcemap("A", "sm-a", "shared.map", &["lib.ts"]).await.unwrap();
    ws.add_sourcemap("B", "sm-b", "shared.map", &["lib.ts"]).await.unwrap();
    let own = ws.add_sourcemap("A", "sm-own", "own.map", &[]).await.unwrap();

    remove_recording(ws.registry(), "A").await.unwrap();

    assert!(!data_a.exists());
    assert!(!own.exists());
    assert!(shared.exists());
    assert!(ws.path().join("shared.lookup").exists());
    assert!(ws.path().join("lib.ts").exists());

    // A is gone from the log, B is untouched
    let remaining = expect_recordings(&ws, 1).await.unwrap();
    assert_eq!(remaining[0].id, "B");
    assert_eq!(remaining[0].sourcemaps.len(), 1);

    remove_recording(ws.registry(), "B").await.unwrap();
    assert!(!data_b.exists());
    assert!(!shared.exists());
    assert!(!ws.path().join("lib.ts").exists());
    expect_recordings(&ws, 0).await.unwrap();
}

#[tokio::test]
async fn test_uploaded_owner_does_not_pin_assets() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    ws.add_on_disk("B", "linux-chromium-1", 8).await.unwrap();
    let shared = ws.add_sourcemap("A", "sm-a", "shared.map", &[]).await.unwrap();
    ws.add_sourcemap("B", "sm-b", "shared.map", &[]).await.unwrap();
    ws.append(LogEntry::upload_started("B", "wss://dispatch.test", "R2"))
        .await
        .unwrap();
    ws.append(LogEntry::upload_finished("B")).await.unwrap();

    remove_recording(ws.registry(), "A").await.unwrap();
    assert!(!shared.exists());
    ws.assert_status("B", RecordingStatus::Uploaded).await.unwrap();
}

#[tokio::test]
async fn test_remove_unknown_recording_fails() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    assert!(remove_recording(ws.registry(), "nope").await.is_err());
    expect_recordings(&ws, 1).await.unwrap();
}

#[tokio::test]
async fn test_remove_all_clears_directory_and_log() {
    let ws = Workspace::new().unwrap();
    let a = ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    let b = ws.add_on_disk("B", "linux-gecko-1", 8).await.unwrap();
    let map = ws.add_sourcemap("B", "sm", "b.map", &["b.ts"]).await.unwrap();

    let stats = remove_all_recordings(ws.registry()).await.unwrap();
    assert_eq!(stats.removed_files, 5);
    for path in [&a, &b, &map] {
        assert!(!path.exists());
    }
    expect_recordings(&ws, 0).await.unwrap();
    assert!(ws.log().read_all().await.unwrap().is_empty());
}
