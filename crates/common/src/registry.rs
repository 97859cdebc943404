//! Recording registry
//!
//! Rebuilds current recording state by replaying the event log in order.
//! State is never cached across invocations; every query re-reads the log.

use crate::filter::RecordingPredicate;
use crate::log::{EventLog, LogEntry};
use crate::metadata::default_title;
use crate::types::{
    Metadata, OriginalSource, Recording, RecordingStatus, SourceMapEntry,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Fold an ordered entry sequence into recordings keyed by id.
pub fn reconstruct(entries: &[LogEntry]) -> HashMap<String, Recording> {
    reconstruct_ordered(entries)
        .into_iter()
        .map(|recording| (recording.id.clone(), recording))
        .collect()
}

/// Fold an ordered entry sequence, keeping recordings in the order their
/// `createRecording` entries appear in the log.
pub fn reconstruct_ordered(entries: &[LogEntry]) -> Vec<Recording> {
    let mut recordings: Vec<Recording> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        if let LogEntry::CreateRecording { id, timestamp, build_id } = entry {
            if index.contains_key(id) {
                debug!("Ignoring duplicate createRecording for {}", id);
                continue;
            }
            let create_time = DateTime::<Utc>::from_timestamp_millis(*timestamp).unwrap_or_default();
            index.insert(id.clone(), recordings.len());
            recordings.push(Recording::new(id.clone(), create_time, build_id.clone()));
            continue;
        }

        match index.get(entry.owner_id()) {
            Some(&i) => apply(&mut recordings[i], entry),
            None => trace!("Entry for unknown recording {}", entry.owner_id()),
        }
    }

    recordings
}

/// Move a recording to `next` if the transition is allowed.
fn advance(recording: &mut Recording, next: RecordingStatus) -> bool {
    if recording.status.can_transition_to(next) {
        recording.status = next;
        true
    } else {
        trace!(
            "Ignoring transition {} -> {} for {}",
            recording.status,
            next,
            recording.id
        );
        false
    }
}

fn apply(recording: &mut Recording, entry: &LogEntry) {
    match entry {
        LogEntry::CreateRecording { .. } => {}
        LogEntry::WriteStarted { path, .. } => {
            if advance(recording, RecordingStatus::StartedWrite) {
                recording.path = Some(path.clone());
            }
        }
        LogEntry::WriteFinished { .. } => {
            advance(recording, RecordingStatus::OnDisk);
        }
        LogEntry::UploadStarted { server, recording_id, .. } => {
            if advance(recording, RecordingStatus::StartedUpload) {
                recording.server = Some(server.clone());
                recording.remote_id = Some(recording_id.clone());
            }
        }
        LogEntry::UploadFinished { .. } => {
            advance(recording, RecordingStatus::Uploaded);
        }
        LogEntry::RecordingUnusable { reason, .. } => {
            if advance(recording, RecordingStatus::Unusable) {
                recording.unusable_reason = Some(reason.clone());
            }
        }
        LogEntry::Crashed { .. } => {
            advance(recording, RecordingStatus::Crashed);
        }
        LogEntry::CrashData { data, .. } => {
            recording
                .crash_data
                .get_or_insert_with(Vec::new)
                .push(data.clone());
        }
        LogEntry::CrashUploaded { server, .. } => {
            if advance(recording, RecordingStatus::CrashUploaded) {
                recording.server = Some(server.clone());
            }
        }
        LogEntry::AddMetadata { metadata, .. } => merge_metadata(&mut recording.metadata, metadata),
        LogEntry::SourcemapAdded {
            id,
            path,
            base_url,
            target_content_hash,
            target_url_hash,
            target_map_url_hash,
            ..
        } => {
            if recording.sourcemaps.iter().any(|sm| &sm.id == id) {
                return;
            }
            recording.sourcemaps.push(SourceMapEntry {
                id: id.clone(),
                path: path.clone(),
                base_url: base_url.clone(),
                target_content_hash: target_content_hash.clone(),
                target_url_hash: target_url_hash.clone(),
                target_map_url_hash: target_map_url_hash.clone(),
                original_sources: Vec::new(),
            });
        }
        LogEntry::OriginalSourceAdded { path, parent_id, parent_offset, .. } => {
            match recording.sourcemaps.iter_mut().find(|sm| &sm.id == parent_id) {
                Some(sourcemap) => sourcemap.original_sources.push(OriginalSource {
                    path: path.clone(),
                    parent_offset: *parent_offset,
                }),
                None => trace!("Original source for unknown source map {}", parent_id),
            }
        }
    }
}

fn merge_metadata(target: &mut Metadata, update: &Metadata) {
    for (key, value) in update {
        target.insert(key.clone(), value.clone());
    }
    if !target.contains_key("title") {
        if let Some(title) = default_title(target) {
            target.insert("title".to_string(), title.into());
        }
    }
}

/// Options for `Registry::list`
#[derive(Debug, Default)]
pub struct ListOptions {
    pub predicate: RecordingPredicate,
    /// Keep crashed recordings even when the predicate rejects them
    pub include_crashes: bool,
    /// Keep recordings from processes that captured nothing
    pub include_hidden: bool,
    /// Do not restrict the listing to upload-eligible statuses
    pub all: bool,
}

impl ListOptions {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }
}

/// Apply listing options to an already reconstructed set.
pub fn filter_recordings(recordings: Vec<Recording>, options: &ListOptions) -> Vec<Recording> {
    recordings
        .into_iter()
        .filter(|r| options.include_hidden || !r.is_hidden())
        .filter(|r| options.all || r.status.is_upload_eligible())
        .filter(|r| {
            options.predicate.matches(r)
                || (options.include_crashes && r.status == RecordingStatus::Crashed)
        })
        .collect()
}

/// Query surface over one event log
#[derive(Debug, Clone)]
pub struct Registry {
    log: EventLog,
}

impl Registry {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Every known recording, in log creation order.
    pub async fn recordings(&self) -> Result<Vec<Recording>> {
        let entries = self.log.entries().await?;
        Ok(reconstruct_ordered(&entries))
    }

    pub async fn list(&self, options: &ListOptions) -> Result<Vec<Recording>> {
        let recordings = self.recordings().await?;
        let total = recordings.len();
        let listed = filter_recordings(recordings, options);
        debug!("Listed {} of {} recordings", listed.len(), total);
        Ok(listed)
    }

    pub async fn find(&self, id: &str) -> Result<Recording> {
        let entries = self.log.entries().await?;
        reconstruct(&entries)
            .remove(id)
            .ok_or_else(|| Error::recording_not_found(id))
    }

    /// Attach metadata to an existing recording.
    pub async fn add_metadata(&self, id: &str, metadata: Metadata) -> Result<()> {
        self.find(id).await?;
        self.log.append(&LogEntry::add_metadata(id, metadata)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CrashData;
    use serde_json::json;
    use std::path::PathBuf;

    fn create(id: &str) -> LogEntry {
        LogEntry::create_recording(id, "linux-gecko-20230101")
    }

    #[test]
    fn test_write_lifecycle() {
        let entries = vec![
            create("a"),
            LogEntry::write_started("a", "/tmp/a"),
            LogEntry::write_finished("a"),
        ];
        let recordings = reconstruct(&entries);
        let a = &recordings["a"];
        assert_eq!(a.status, RecordingStatus::OnDisk);
        assert_eq!(a.path, Some(PathBuf::from("/tmp/a")));
        assert_eq!(a.runtime, "gecko");
    }

    #[test]
    fn test_regression_is_ignored() {
        let entries = vec![
            create("a"),
            LogEntry::write_started("a", "/tmp/a"),
            LogEntry::write_finished("a"),
            LogEntry::write_started("a", "/tmp/other"),
        ];
        let a = &reconstruct(&entries)["a"];
        assert_eq!(a.status, RecordingStatus::OnDisk);
        assert_eq!(a.path, Some(PathBuf::from("/tmp/a")));
    }

    #[test]
    fn test_crashed_is_sink_until_crash_uploaded() {
        let entries = vec![
            create("a"),
            LogEntry::crashed("a"),
            LogEntry::write_finished("a"),
            LogEntry::crash_data("a", CrashData::Diagnostic(Default::default())),
            LogEntry::crash_uploaded("a", "wss://server"),
            LogEntry::crashed("a"),
        ];
        let a = &reconstruct(&entries)["a"];
        assert_eq!(a.status, RecordingStatus::CrashUploaded);
        assert_eq!(a.crash_data.as_ref().map(Vec::len), Some(1));
        assert_eq!(a.server.as_deref(), Some("wss://server"));
    }

    #[test]
    fn test_unusable_is_absorbing() {
        let entries = vec![
            create("a"),
            LogEntry::recording_unusable("a", "No interesting content"),
            LogEntry::write_finished("a"),
            LogEntry::crashed("a"),
        ];
        let a = &reconstruct(&entries)["a"];
        assert_eq!(a.status, RecordingStatus::Unusable);
        assert!(a.is_hidden());
    }

    #[test]
    fn test_metadata_merge_and_title() {
        let entries = vec![
            create("a"),
            LogEntry::add_metadata("a", json!({"uri": "http://localhost:3000/"}).as_object().cloned().unwrap()),
            LogEntry::add_metadata("a", json!({"extra": true}).as_object().cloned().unwrap()),
        ];
        let a = &reconstruct(&entries)["a"];
        assert_eq!(a.title(), Some("Replay of localhost"));
        assert_eq!(a.metadata["extra"], true);

        let entries = vec![
            create("b"),
            LogEntry::add_metadata("b", json!({"title": "mine", "uri": "http://x/"}).as_object().cloned().unwrap()),
        ];
        assert_eq!(reconstruct(&entries)["b"].title(), Some("mine"));
    }

    #[test]
    fn test_sourcemaps_and_original_sources() {
        let raw = vec![
            json!({"kind": "createRecording", "id": "a", "timestamp": 1, "buildId": "x-node-1"}),
            json!({"kind": "sourcemapAdded", "id": "sm1", "recordingId": "a", "path": "/maps/1.map", "baseURL": "http://x/app.js"}),
            json!({"kind": "originalSourceAdded", "recordingId": "a", "path": "/maps/src/app.ts", "parentId": "sm1", "parentOffset": 3}),
            json!({"kind": "originalSourceAdded", "recordingId": "a", "path": "/maps/src/x.ts", "parentId": "missing", "parentOffset": 0}),
        ];
        let entries: Vec<LogEntry> = raw.iter().filter_map(LogEntry::from_raw).collect();
        let a = &reconstruct(&entries)["a"];
        assert_eq!(a.sourcemaps.len(), 1);
        assert_eq!(a.sourcemaps[0].original_sources.len(), 1);
        assert_eq!(a.sourcemaps[0].original_sources[0].parent_offset, 3);
    }

    #[test]
    fn test_order_follows_log_not_timestamps() {
        let raw = vec![
            json!({"kind": "createRecording", "id": "z", "timestamp": 5, "buildId": "x-node-1"}),
            json!({"kind": "createRecording", "id": "a", "timestamp": 5, "buildId": "x-node-1"}),
            json!({"kind": "createRecording", "id": "m", "timestamp": 1, "buildId": "x-node-1"}),
            json!({"kind": "createRecording", "id": "a", "timestamp": 0, "buildId": "x-node-2"}),
        ];
        let entries: Vec<LogEntry> = raw.iter().filter_map(LogEntry::from_raw).collect();
        let recordings = reconstruct_ordered(&entries);
        let ids: Vec<_> = recordings.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
        assert_eq!(recordings[1].build_id, "x-node-1");
    }

    #[tokio::test]
    async fn test_registry_lists_in_log_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("recordings.log");
        let lines = [
            r#"{"kind":"createRecording","id":"z","timestamp":5,"buildId":"x-node-1"}"#,
            r#"{"kind":"createRecording","id":"a","timestamp":5,"buildId":"x-node-1"}"#,
            r#"{"kind":"createRecording","id":"m","timestamp":1,"buildId":"x-node-1"}"#,
        ];
        tokio::fs::write(&path, lines.join("\n")).await.unwrap();

        let registry = Registry::new(EventLog::new(&path));
        let ids: Vec<_> = registry
            .list(&ListOptions::all())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    fn recording_with(id: &str, status: RecordingStatus) -> Recording {
        let mut r = Recording::new(id.to_string(), Utc::now(), "x-node-1".to_string());
        r.status = status;
        r
    }

    #[test]
    fn test_list_filters() {
        let mut hidden = recording_with("hidden", RecordingStatus::Unusable);
        hidden.unusable_reason = Some("No interesting content".to_string());
        let recordings = vec![
            recording_with("disk", RecordingStatus::OnDisk),
            recording_with("done", RecordingStatus::Uploaded),
            recording_with("crash", RecordingStatus::Crashed),
            hidden,
        ];

        let listed = filter_recordings(recordings.clone(), &ListOptions::default());
        let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["disk", "crash"]);

        let listed = filter_recordings(recordings.clone(), &ListOptions::all());
        assert_eq!(listed.len(), 3);

        let options = ListOptions {
            include_hidden: true,
            ..ListOptions::all()
        };
        assert_eq!(filter_recordings(recordings.clone(), &options).len(), 4);

        let options = ListOptions {
            predicate: RecordingPredicate::func(|r| r.id == "disk"),
            include_crashes: true,
            ..Default::default()
        };
        let ids: Vec<_> = filter_recordings(recordings, &options)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["disk", "crash"]);
    }
}
