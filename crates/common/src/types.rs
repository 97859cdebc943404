//! Core types for reclog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Free-form recording metadata, merged incrementally from `addMetadata` entries.
pub type Metadata = Map<String, Value>;

/// Marker left in `unusableReason` by content processes that captured nothing.
pub const NO_INTERESTING_CONTENT: &str = "No interesting content";

/// Lifecycle status of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingStatus {
    Unknown,
    StartedWrite,
    OnDisk,
    StartedUpload,
    Uploaded,
    Unusable,
    Crashed,
    CrashUploaded,
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl RecordingStatus {
    /// Position on the linear write/upload chain, if the status is on it.
    fn rank(self) -> Option<u8> {
        match self {
            RecordingStatus::Unknown => Some(0),
            RecordingStatus::StartedWrite => Some(1),
            RecordingStatus::OnDisk => Some(2),
            RecordingStatus::StartedUpload => Some(3),
            RecordingStatus::Uploaded => Some(4),
            RecordingStatus::Unusable
            | RecordingStatus::Crashed
            | RecordingStatus::CrashUploaded => None,
        }
    }

    /// Whether no further transition can leave this status.
    pub fn is_absorbing(self) -> bool {
        matches!(self, RecordingStatus::Unusable | RecordingStatus::CrashUploaded)
    }

    /// Transition guard for the registry fold.
    ///
    /// Chain statuses only move forward (re-entering the same status is allowed
    /// so that a retried upload can record its new remote id). `unusable` and
    /// `crashUploaded` are sinks, `crashed` only leads to `crashUploaded`, and an
    /// uploaded recording can no longer crash or become unusable.
    pub fn can_transition_to(self, next: RecordingStatus) -> bool {
        if self.is_absorbing() {
            return false;
        }
        if self == RecordingStatus::Crashed {
            return next == RecordingStatus::CrashUploaded;
        }

        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => target >= current,
            (Some(_), None) => match next {
                RecordingStatus::Unusable | RecordingStatus::Crashed => {
                    self != RecordingStatus::Uploaded
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Statuses the upload orchestrator will act on.
    pub fn is_upload_eligible(self) -> bool {
        matches!(
            self,
            RecordingStatus::OnDisk
                | RecordingStatus::StartedWrite
                | RecordingStatus::StartedUpload
                | RecordingStatus::Crashed
        )
    }

    /// Ordering used when listing recordings to a user: problems first.
    pub fn severity(self) -> u8 {
        match self {
            RecordingStatus::Crashed => 0,
            RecordingStatus::Unusable => 1,
            RecordingStatus::StartedUpload => 2,
            RecordingStatus::StartedWrite => 3,
            RecordingStatus::Unknown => 4,
            RecordingStatus::OnDisk => 5,
            RecordingStatus::CrashUploaded => 6,
            RecordingStatus::Uploaded => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordingStatus::Unknown => "unknown",
            RecordingStatus::StartedWrite => "startedWrite",
            RecordingStatus::OnDisk => "onDisk",
            RecordingStatus::StartedUpload => "startedUpload",
            RecordingStatus::Uploaded => "uploaded",
            RecordingStatus::Unusable => "unusable",
            RecordingStatus::Crashed => "crashed",
            RecordingStatus::CrashUploaded => "crashUploaded",
        }
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown recording status '{}'", s))
    }
}

/// Original source file referenced by a source map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalSource {
    pub path: PathBuf,
    pub parent_offset: u64,
}

/// Source map captured alongside a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapEntry {
    pub id: String,
    pub path: PathBuf,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub target_content_hash: Option<String>,
    #[serde(rename = "targetURLHash")]
    pub target_url_hash: Option<String>,
    #[serde(rename = "targetMapURLHash")]
    pub target_map_url_hash: Option<String>,
    #[serde(default)]
    pub original_sources: Vec<OriginalSource>,
}

impl SourceMapEntry {
    /// Path of the lookup file written next to the source map.
    pub fn lookup_path(&self) -> PathBuf {
        lookup_path_for(&self.path)
    }
}

/// `foo.map` -> `foo.lookup`; any other name gets `.lookup` appended.
pub fn lookup_path_for(map_path: &Path) -> PathBuf {
    match map_path.extension() {
        Some(ext) if ext == "map" => map_path.with_extension("lookup"),
        _ => {
            let mut name = map_path.as_os_str().to_os_string();
            name.push(".lookup");
            PathBuf::from(name)
        }
    }
}

/// Crash diagnostics attached to a recording.
///
/// Serialized as a plain JSON object. Objects tagged
/// `{"kind": "recordingMetadata"}` identify the recording a crash report
/// belongs to; everything else is carried as an opaque diagnostic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum CrashData {
    RecordingMetadata { recording_id: String },
    Diagnostic(Map<String, Value>),
}

impl CrashData {
    pub fn recording_metadata(recording_id: impl Into<String>) -> Self {
        CrashData::RecordingMetadata {
            recording_id: recording_id.into(),
        }
    }
}

impl From<Value> for CrashData {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let is_marker = map.get("kind").and_then(Value::as_str) == Some("recordingMetadata");
                match (is_marker, map.get("recordingId").and_then(Value::as_str)) {
                    (true, Some(id)) => CrashData::RecordingMetadata {
                        recording_id: id.to_string(),
                    },
                    _ => CrashData::Diagnostic(map),
                }
            }
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                CrashData::Diagnostic(map)
            }
        }
    }
}

impl From<CrashData> for Value {
    fn from(data: CrashData) -> Self {
        match data {
            CrashData::RecordingMetadata { recording_id } => serde_json::json!({
                "kind": "recordingMetadata",
                "recordingId": recording_id,
            }),
            CrashData::Diagnostic(map) => Value::Object(map),
        }
    }
}

/// A captured session and everything known about it locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub create_time: DateTime<Utc>,
    pub build_id: String,
    pub runtime: String,
    pub status: RecordingStatus,
    pub path: Option<PathBuf>,
    pub server: Option<String>,
    pub remote_id: Option<String>,
    pub metadata: Metadata,
    pub sourcemaps: Vec<SourceMapEntry>,
    pub unusable_reason: Option<String>,
    pub crash_data: Option<Vec<CrashData>>,
}

impl Recording {
    pub fn new(id: String, create_time: DateTime<Utc>, build_id: String) -> Self {
        let runtime = runtime_from_build_id(&build_id);
        Self {
            id,
            create_time,
            build_id,
            runtime,
            status: RecordingStatus::Unknown,
            path: None,
            server: None,
            remote_id: None,
            metadata: Metadata::new(),
            sourcemaps: Vec::new(),
            unusable_reason: None,
            crash_data: None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(Value::as_str)
    }

    /// Recordings from content processes that captured nothing.
    pub fn is_hidden(&self) -> bool {
        self.unusable_reason
            .as_deref()
            .map_or(false, |reason| reason.contains(NO_INTERESTING_CONTENT))
    }

    /// Every on-disk asset besides the primary data file.
    pub fn asset_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for sourcemap in &self.sourcemaps {
            paths.push(sourcemap.path.clone());
            paths.push(sourcemap.lookup_path());
            paths.extend(sourcemap.original_sources.iter().map(|s| s.path.clone()));
        }
        paths
    }
}

/// Extract the runtime name from a build id such as `linux-chromium-20230228-abcd`.
pub fn runtime_from_build_id(build_id: &str) -> String {
    build_id
        .split('-')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_from_build_id() {
        assert_eq!(runtime_from_build_id("2023-chromium-x"), "chromium");
        assert_eq!(runtime_from_build_id("linux-gecko-20230301-abc"), "gecko");
        assert_eq!(runtime_from_build_id("macOS-node-20230101"), "node");
        assert_eq!(runtime_from_build_id("garbage"), "unknown");
    }

    #[test]
    fn test_chain_is_monotonic() {
        use RecordingStatus::*;
        assert!(Unknown.can_transition_to(StartedWrite));
        assert!(StartedWrite.can_transition_to(OnDisk));
        assert!(StartedUpload.can_transition_to(StartedUpload));
        assert!(!OnDisk.can_transition_to(StartedWrite));
        assert!(!Uploaded.can_transition_to(StartedUpload));
    }

    #[test]
    fn test_sinks() {
        use RecordingStatus::*;
        assert!(!Unusable.can_transition_to(OnDisk));
        assert!(!CrashUploaded.can_transition_to(Crashed));
        assert!(!Crashed.can_transition_to(Uploaded));
        assert!(Crashed.can_transition_to(CrashUploaded));
        assert!(OnDisk.can_transition_to(Crashed));
        assert!(!Uploaded.can_transition_to(Unusable));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("onDisk".parse::<RecordingStatus>().unwrap(), RecordingStatus::OnDisk);
        assert!("on_disk".parse::<RecordingStatus>().is_err());
    }

    #[test]
    fn test_lookup_path() {
        assert_eq!(
            lookup_path_for(Path::new("/tmp/sm/abc.map")),
            PathBuf::from("/tmp/sm/abc.lookup")
        );
        assert_eq!(
            lookup_path_for(Path::new("/tmp/sm/abc")),
            PathBuf::from("/tmp/sm/abc.lookup")
        );
    }

    #[test]
    fn test_crash_data_tagging() {
        let marker: CrashData =
            serde_json::from_str(r#"{"kind":"recordingMetadata","recordingId":"r1"}"#).unwrap();
        assert_eq!(marker, CrashData::recording_metadata("r1"));

        let diag: CrashData = serde_json::from_str(r#"{"kind":"minidump","bytes":12}"#).unwrap();
        assert!(matches!(diag, CrashData::Diagnostic(ref m) if m["bytes"] == 12));

        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["recordingId"], "r1");
    }
}
