//! Upload orchestration scenarios against the fake service

use reclog_common::{LogEntry, RecordingStatus, UploadOutcome};
use reclog_common::upload::SkipReason;
use reclog_common::CrashData;
use reclog_e2e::{init_tracing, FakeConnector, Workspace, TEST_SERVER};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_single_upload_records_remote_id() {
    init_tracing();
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 128).await.unwrap();
    ws.add_sourcemap("A", "sm1", "app.map", &["app.ts", "util.ts"])
        .await
        .unwrap();

    let fake = FakeConnector::new();
    let uploader = ws.uploader(&fake, ws.upload_options(20));

    let outcome = uploader.upload_by_id("A").await.unwrap();
    assert_eq!(
        outcome,
        UploadOutcome::Uploaded {
            remote_id: "remote-A".to_string()
        }
    );

    let a = ws.recording("A").await.unwrap();
    assert_eq!(a.status, RecordingStatus::Uploaded);
    assert_eq!(a.remote_id.as_deref(), Some("remote-A"));
    assert_eq!(a.server.as_deref(), Some(TEST_SERVER));

    let calls = fake.calls();
    assert_eq!(calls.transfers, vec![(FakeConnector::upload_link_for("A"), 128)]);
    assert_eq!(calls.ended, vec!["remote-A"]);
    assert_eq!(calls.sourcemaps.len(), 1);
    assert_eq!(calls.original_sources.len(), 2);
    assert_eq!(calls.closes, calls.connections);
}

#[tokio::test]
async fn test_upload_is_idempotent() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();

    let fake = FakeConnector::new();
    let uploader = ws.uploader(&fake, ws.upload_options(20));

    uploader.upload_by_id("A").await.unwrap();
    let second = uploader.upload_by_id("A").await.unwrap();
    assert_eq!(
        second,
        UploadOutcome::AlreadyUploaded {
            remote_id: "remote-A".to_string()
        }
    );
    assert_eq!(fake.calls().begun.len(), 1);
    assert_eq!(fake.calls().connections, 1);
}

#[tokio::test]
async fn test_batch_never_exceeds_concurrency_bound() {
    let ws = Workspace::new().unwrap();
    for i in 0..30 {
        ws.add_on_disk(&format!("rec-{:02}", i), "linux-chromium-1", 8)
            .await
            .unwrap();
    }

    let fake = FakeConnector::with_transfer_delay(Duration::from_millis(20));
    let uploader = ws.uploader(&fake, ws.upload_options(20));

    let recordings = ws.registry().recordings().await.unwrap();
    let report = uploader.upload_all(recordings).await;

    assert!(report.success());
    assert_eq!(report.items.len(), 30);
    assert!(fake.max_in_flight() <= 20, "max in flight {}", fake.max_in_flight());
    assert!(fake.max_in_flight() > 1);
    assert_eq!(fake.in_flight(), 0);

    for recording in ws.registry().recordings().await.unwrap() {
        assert_eq!(recording.status, RecordingStatus::Uploaded);
    }
}

#[tokio::test]
async fn test_requested_concurrency_is_capped() {
    let ws = Workspace::new().unwrap();
    for i in 0..30 {
        ws.add_on_disk(&format!("rec-{:02}", i), "linux-chromium-1", 8)
            .await
            .unwrap();
    }

    let fake = FakeConnector::with_transfer_delay(Duration::from_millis(20));
    let uploader = ws.uploader(&fake, ws.upload_options(100));

    let recordings = ws.registry().recordings().await.unwrap();
    assert!(uploader.upload_all(recordings).await.success());
    assert!(fake.max_in_flight() <= 25, "max in flight {}", fake.max_in_flight());
}

#[tokio::test]
async fn test_crash_reports_are_tagged_per_payload() {
    let ws = Workspace::new().unwrap();
    ws.add_crashed(
        "C",
        "linux-chromium-1",
        vec![
            json!({ "kind": "minidump", "path": "/tmp/crash.dmp" }),
            json!({ "kind": "log", "text": "segfault" }),
        ],
    )
    .await
    .unwrap();

    let fake = FakeConnector::new();
    let uploader = ws.uploader(&fake, ws.upload_options(20));

    let outcome = uploader.upload_by_id("C").await.unwrap();
    assert_eq!(outcome, UploadOutcome::CrashReported);

    let calls = fake.calls();
    assert_eq!(calls.crash_reports.len(), 2);
    for report in &calls.crash_reports {
        assert_eq!(report.len(), 2);
        assert_eq!(report[1], CrashData::recording_metadata("C"));
    }
    assert!(calls.transfers.is_empty());
    assert!(calls.begun.is_empty());

    let entries = ws.log().entries().await.unwrap();
    let crash_uploaded = entries
        .iter()
        .filter(|e| matches!(e, LogEntry::CrashUploaded { .. }))
        .count();
    assert_eq!(crash_uploaded, 1);
    ws.assert_status("C", RecordingStatus::CrashUploaded).await.unwrap();
}

#[tokio::test]
async fn test_crash_without_payload_sends_marker_only() {
    let ws = Workspace::new().unwrap();
    ws.add_crashed("C", "linux-chromium-1", vec![]).await.unwrap();

    let fake = FakeConnector::new();
    ws.uploader(&fake, ws.upload_options(20))
        .upload_by_id("C")
        .await
        .unwrap();

    assert_eq!(
        fake.calls().crash_reports,
        vec![vec![CrashData::recording_metadata("C")]]
    );
}

#[tokio::test]
async fn test_failures_are_isolated_per_recording() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("good", "linux-chromium-1", 8).await.unwrap();
    ws.add_on_disk("bad-meta", "linux-chromium-1", 8).await.unwrap();
    ws.add_on_disk("bad-net", "linux-chromium-1", 8).await.unwrap();
    ws.append(LogEntry::add_metadata(
        "bad-meta",
        json!({ "title": 42 }).as_object().cloned().unwrap(),
    ))
    .await
    .unwrap();

    let fake = FakeConnector::new();
    fake.fail_transfers_for("bad-net");
    let uploader = ws.uploader(&fake, ws.upload_options(20));

    let recordings = ws.registry().recordings().await.unwrap();
    let report = uploader.upload_all(recordings).await;

    assert!(!report.success());
    assert_eq!(report.failures().count(), 2);

    ws.assert_status("good", RecordingStatus::Uploaded).await.unwrap();
    // validation fails before anything reaches the service
    ws.assert_status("bad-meta", RecordingStatus::OnDisk).await.unwrap();
    ws.assert_status("bad-net", RecordingStatus::StartedUpload).await.unwrap();

    let calls = fake.calls();
    assert!(!calls.begun.contains(&"bad-meta".to_string()));
    // retried up to the policy limit
    assert_eq!(calls.transfer_attempts, 1 + 3);
    assert_eq!(calls.closes, calls.connections);
}

#[tokio::test]
async fn test_interrupted_upload_can_be_retried() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    ws.append(LogEntry::upload_started("A", TEST_SERVER, "stale-remote"))
        .await
        .unwrap();

    let fake = FakeConnector::new();
    let outcome = ws
        .uploader(&fake, ws.upload_options(20))
        .upload_by_id("A")
        .await
        .unwrap();

    assert_eq!(outcome.remote_id(), Some("remote-A"));
    assert_eq!(ws.recording("A").await.unwrap().remote_id.as_deref(), Some("remote-A"));
}

#[tokio::test]
async fn test_sourcemap_failures_do_not_fail_the_upload() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    let broken = ws.add_sourcemap("A", "sm1", "broken.map", &["a.ts"]).await.unwrap();
    ws.add_sourcemap("A", "sm2", "fine.map", &["b.ts", "c.ts"]).await.unwrap();

    let fake = FakeConnector::new();
    fake.fail_sourcemap(&broken);
    fake.fail_original_source(ws.path().join("c.ts"));

    let outcome = ws
        .uploader(&fake, ws.upload_options(20))
        .upload_by_id("A")
        .await
        .unwrap();
    assert!(matches!(outcome, UploadOutcome::Uploaded { .. }));

    let calls = fake.calls();
    assert_eq!(calls.sourcemaps, vec![ws.path().join("fine.map")]);
    assert_eq!(calls.original_sources, vec![ws.path().join("b.ts")]);
    ws.assert_status("A", RecordingStatus::Uploaded).await.unwrap();
}

#[tokio::test]
async fn test_ineligible_recordings_are_skipped() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    ws.append(LogEntry::recording_unusable("A", "empty")).await.unwrap();

    let fake = FakeConnector::new();
    let outcome = ws
        .uploader(&fake, ws.upload_options(20))
        .upload_by_id("A")
        .await
        .unwrap();

    assert_eq!(
        outcome,
        UploadOutcome::Skipped(SkipReason::IneligibleStatus(RecordingStatus::Unusable))
    );
    assert_eq!(fake.calls().connections, 0);
}

#[tokio::test]
async fn test_processing_and_cleanup_after_upload() {
    let ws = Workspace::new().unwrap();
    let data = ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    let map = ws.add_sourcemap("A", "sm1", "app.map", &["app.ts"]).await.unwrap();

    let fake = FakeConnector::new();
    fake.fail_processing_for("A", "unsupported build");

    let mut options = ws.upload_options(20);
    options.process_after_upload = true;
    options.cleanup_after_upload = true;

    let outcome = ws.uploader(&fake, options).upload_by_id("A").await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Uploaded { .. }));
    assert_eq!(fake.calls().processed, vec!["remote-A"]);
    assert!(!data.exists());
    assert!(!map.exists());
    assert!(!ws.path().join("app.ts").exists());
}

#[tokio::test]
async fn test_connect_failure_aborts_only_that_recording() {
    let ws = Workspace::new().unwrap();
    for id in ["A", "B", "C"] {
        ws.add_on_disk(id, "linux-chromium-1", 8).await.unwrap();
    }

    let fake = FakeConnector::new();
    fake.fail_connects(1);
    let uploader = ws.uploader(&fake, ws.upload_options(20));

    let recordings = ws.registry().recordings().await.unwrap();
    let report = uploader.upload_all(recordings).await;

    assert!(!report.success());
    let failed: Vec<(String, bool)> = report
        .failures()
        .map(|(id, e)| (id.to_string(), matches!(e, reclog_common::Error::Connection { .. })))
        .collect();
    assert_eq!(failed.len(), 1);
    let (failed_id, is_connection) = &failed[0];
    assert!(is_connection);

    let started_for_failed = ws
        .log()
        .entries()
        .await
        .unwrap()
        .iter()
        .filter(|e| matches!(e, LogEntry::UploadStarted { id, .. } if id == failed_id))
        .count();
    assert_eq!(started_for_failed, 0);
    ws.assert_status(failed_id, RecordingStatus::OnDisk).await.unwrap();

    for id in ["A", "B", "C"].into_iter().filter(|id| *id != failed_id.as_str()) {
        ws.assert_status(id, RecordingStatus::Uploaded).await.unwrap();
    }

    let calls = fake.calls();
    assert_eq!(calls.failed_connections, 1);
    assert_eq!(calls.connections, 2);
    assert_eq!(calls.closes, 2);
}

#[tokio::test]
async fn test_metadata_failure_is_only_a_warning() {
    let ws = Workspace::new().unwrap();
    ws.add_on_disk("A", "linux-chromium-1", 8).await.unwrap();
    ws.append(LogEntry::add_metadata(
        "A",
        json!({ "title": "checkout" }).as_object().cloned().unwrap(),
    ))
    .await
    .unwrap();

    let fake = FakeConnector::new();
    fake.fail_metadata_for("A");

    let outcome = ws
        .uploader(&fake, ws.upload_options(20))
        .upload_by_id("A")
        .await
        .unwrap();

    assert!(matches!(outcome, UploadOutcome::Uploaded { .. }));
    ws.assert_status("A", RecordingStatus::Uploaded).await.unwrap();
    let calls = fake.calls();
    assert!(calls.metadata.is_empty());
    assert_eq!(calls.transfers.len(), 1);
}

#[tokio::test]
async fn test_partially_reported_crash_stays_crashed() {
    let ws = Workspace::new().unwrap();
    ws.add_crashed(
        "C",
        "linux-chromium-1",
        vec![json!({ "kind": "minidump" }), json!({ "kind": "log" })],
    )
    .await
    .unwrap();

    let fake = FakeConnector::new();
    fake.fail_crash_reports_after(1);
    let uploader = ws.uploader(&fake, ws.upload_options(20));

    assert!(uploader.upload_by_id("C").await.is_err());
    assert_eq!(fake.calls().crash_reports.len(), 1);
    ws.assert_status("C", RecordingStatus::Crashed).await.unwrap();

    let crash_uploaded = ws
        .log()
        .entries()
        .await
        .unwrap()
        .iter()
        .filter(|e| matches!(e, LogEntry::CrashUploaded { .. }))
        .count();
    assert_eq!(crash_uploaded, 0);
}
