//! Append-only recording event log
//!
//! One JSON object per line. The log is the single source of truth for
//! recording state; everything else is rebuilt from it by folding.
//!
//! The store assumes a single writing process per log file. Appends from
//! tasks inside one process are serialized, but two processes appending to
//! the same file are not coordinated and can interleave or lose a rewrite.

use crate::types::{CrashData, Metadata};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// A single lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LogEntry {
    CreateRecording {
        id: String,
        timestamp: i64,
        build_id: String,
    },
    WriteStarted {
        id: String,
        timestamp: i64,
        path: PathBuf,
    },
    WriteFinished {
        id: String,
        timestamp: i64,
    },
    UploadStarted {
        id: String,
        timestamp: i64,
        server: String,
        /// Remote id assigned by the service
        recording_id: String,
    },
    UploadFinished {
        id: String,
        timestamp: i64,
    },
    RecordingUnusable {
        id: String,
        timestamp: i64,
        reason: String,
    },
    Crashed {
        id: String,
        timestamp: i64,
    },
    CrashData {
        id: String,
        timestamp: i64,
        data: CrashData,
    },
    CrashUploaded {
        id: String,
        timestamp: i64,
        server: String,
    },
    AddMetadata {
        id: String,
        timestamp: i64,
        metadata: Metadata,
    },
    SourcemapAdded {
        id: String,
        recording_id: String,
        path: PathBuf,
        #[serde(rename = "baseURL")]
        base_url: String,
        #[serde(default)]
        target_content_hash: Option<String>,
        #[serde(default, rename = "targetURLHash")]
        target_url_hash: Option<String>,
        #[serde(default, rename = "targetMapURLHash")]
        target_map_url_hash: Option<String>,
    },
    OriginalSourceAdded {
        recording_id: String,
        path: PathBuf,
        parent_id: String,
        parent_offset: u64,
    },
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl LogEntry {
    pub fn create_recording(id: impl Into<String>, build_id: impl Into<String>) -> Self {
        LogEntry::CreateRecording {
            id: id.into(),
            timestamp: now_millis(),
            build_id: build_id.into(),
        }
    }

    pub fn write_started(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        LogEntry::WriteStarted {
            id: id.into(),
            timestamp: now_millis(),
            path: path.into(),
        }
    }

    pub fn write_finished(id: impl Into<String>) -> Self {
        LogEntry::WriteFinished {
            id: id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn upload_started(
        id: impl Into<String>,
        server: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        LogEntry::UploadStarted {
            id: id.into(),
            timestamp: now_millis(),
            server: server.into(),
            recording_id: remote_id.into(),
        }
    }

    pub fn upload_finished(id: impl Into<String>) -> Self {
        LogEntry::UploadFinished {
            id: id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn recording_unusable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        LogEntry::RecordingUnusable {
            id: id.into(),
            timestamp: now_millis(),
            reason: reason.into(),
        }
    }

    pub fn crashed(id: impl Into<String>) -> Self {
        LogEntry::Crashed {
            id: id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn crash_data(id: impl Into<String>, data: CrashData) -> Self {
        LogEntry::CrashData {
            id: id.into(),
            timestamp: now_millis(),
            data,
        }
    }

    pub fn crash_uploaded(id: impl Into<String>, server: impl Into<String>) -> Self {
        LogEntry::CrashUploaded {
            id: id.into(),
            timestamp: now_millis(),
            server: server.into(),
        }
    }

    pub fn add_metadata(id: impl Into<String>, metadata: Metadata) -> Self {
        LogEntry::AddMetadata {
            id: id.into(),
            timestamp: now_millis(),
            metadata,
        }
    }

    /// Local id of the recording this entry belongs to.
    pub fn owner_id(&self) -> &str {
        match self {
            LogEntry::SourcemapAdded { recording_id, .. }
            | LogEntry::OriginalSourceAdded { recording_id, .. } => recording_id,
            LogEntry::CreateRecording { id, .. }
            | LogEntry::WriteStarted { id, .. }
            | LogEntry::WriteFinished { id, .. }
            | LogEntry::UploadStarted { id, .. }
            | LogEntry::UploadFinished { id, .. }
            | LogEntry::RecordingUnusable { id, .. }
            | LogEntry::Crashed { id, .. }
            | LogEntry::CrashData { id, .. }
            | LogEntry::CrashUploaded { id, .. }
            | LogEntry::AddMetadata { id, .. } => id,
        }
    }

    /// Decode a raw log line. Unknown kinds and malformed fields yield `None`.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        match serde_json::from_value(raw.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Ignoring log entry ({}): {}", e, raw);
                None
            }
        }
    }
}

/// Owning recording id of a raw entry, without requiring it to decode fully.
///
/// Works for kinds this version does not know about, so compaction keeps
/// foreign entries intact.
pub fn raw_owner_id(raw: &Value) -> Option<&str> {
    let owner_field = match raw.get("kind").and_then(Value::as_str) {
        Some("sourcemapAdded") | Some("originalSourceAdded") => "recordingId",
        _ => "id",
    };
    raw.get(owner_field).and_then(Value::as_str)
}

/// Durable, ordered event log for one recordings directory
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl EventLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry. Once this returns the entry is visible to `read_all`.
    pub async fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)
            .await?;

        // A writer that died mid-line leaves an unterminated tail. Close it off
        // so the new entry stays on a line of its own.
        if file.metadata().await?.len() > 0 {
            file.seek(SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                line.insert(0, '\n');
            }
        }

        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;

        debug!("Appended {} entry for {}", entry_kind(entry), entry.owner_id());
        Ok(())
    }

    /// Read every parseable line in order. A missing log is empty.
    pub async fn read_all(&self) -> Result<Vec<Value>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(parse_lines(&bytes))
    }

    /// Read and decode every known entry in order.
    pub async fn entries(&self) -> Result<Vec<LogEntry>> {
        Ok(self
            .read_all()
            .await?
            .iter()
            .filter_map(LogEntry::from_raw)
            .collect())
    }

    /// Replace the entire log. Used for compaction after removing recordings.
    pub async fn rewrite(&self, entries: &[Value]) -> Result<()> {
        let mut content = String::new();
        for entry in entries {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }

        let _guard = self.write_lock.lock().await;

        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).await?;

        // Write atomically via temp file
        let tmp_path = dir.join(format!(".recordings-{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, content.as_bytes()).await?;
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!("Rewrote {:?} with {} entries", self.path, entries.len());
        Ok(())
    }
}

/// Lines with invalid UTF-8 fail to parse and are skipped like any other
/// corrupt line.
fn parse_lines(content: &[u8]) -> Vec<Value> {
    content
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .filter_map(|line| match serde_json::from_slice::<Value>(line) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(_) => {
                debug!("Skipping non-object log line");
                None
            }
            Err(e) => {
                debug!("Skipping unparseable log line: {}", e);
                None
            }
        })
        .collect()
}

fn entry_kind(entry: &LogEntry) -> &'static str {
    match entry {
        LogEntry::CreateRecording { .. } => "createRecording",
        LogEntry::WriteStarted { .. } => "writeStarted",
        LogEntry::WriteFinished { .. } => "writeFinished",
        LogEntry::UploadStarted { .. } => "uploadStarted",
        LogEntry::UploadFinished { .. } => "uploadFinished",
        LogEntry::RecordingUnusable { .. } => "recordingUnusable",
        LogEntry::Crashed { .. } => "crashed",
        LogEntry::CrashData { .. } => "crashData",
        LogEntry::CrashUploaded { .. } => "crashUploaded",
        LogEntry::AddMetadata { .. } => "addMetadata",
        LogEntry::SourcemapAdded { .. } => "sourcemapAdded",
        LogEntry::OriginalSourceAdded { .. } => "originalSourceAdded",
    }
}
