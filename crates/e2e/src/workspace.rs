//! Recordings directory fixtures
//!
//! Writes recording files, source maps and event log entries into a
//! temporary directory the same way a recorder would.

use crate::error::{E2eError, E2eResult};
use crate::fake::FakeConnector;
use reclog_common::config::LOG_FILE_NAME;
use reclog_common::retry::RetryPolicy;
use reclog_common::{CrashData, EventLog, LogEntry, Recording, RecordingStatus, Registry, UploadOptions, Uploader};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;

pub const TEST_SERVER: &str = "wss://dispatch.test";

pub struct Workspace {
    dir: TempDir,
    registry: Registry,
}

impl Workspace {
    pub fn new() -> E2eResult<Self> {
        let dir = TempDir::new()?;
        let registry = Registry::new(EventLog::new(dir.path().join(LOG_FILE_NAME)));
        Ok(Self { dir, registry })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn log(&self) -> &EventLog {
        self.registry.log()
    }

    pub async fn append(&self, entry: LogEntry) -> E2eResult<()> {
        self.log().append(&entry).await?;
        Ok(())
    }

    /// Write raw text to the end of the log, bypassing the store.
    pub async fn append_raw(&self, text: &str) -> E2eResult<()> {
        let path = self.log().path();
        let mut content = fs::read_to_string(path).await.unwrap_or_default();
        content.push_str(text);
        fs::write(path, content).await?;
        Ok(())
    }

    /// A fully written recording with a data file of `size` bytes.
    pub async fn add_on_disk(&self, id: &str, build_id: &str, size: usize) -> E2eResult<PathBuf> {
        let path = self.path().join(format!("recording-{}.dat", id));
        fs::write(&path, vec![0xAB; size]).await?;

        self.append(LogEntry::create_recording(id, build_id)).await?;
        self.append(LogEntry::write_started(id, &path)).await?;
        self.append(LogEntry::write_finished(id)).await?;
        Ok(path)
    }

    /// A recording that crashed after writing started, with diagnostic payloads.
    pub async fn add_crashed(&self, id: &str, build_id: &str, payloads: Vec<Value>) -> E2eResult<()> {
        let path = self.path().join(format!("recording-{}.dat", id));
        fs::write(&path, b"partial").await?;

        self.append(LogEntry::create_recording(id, build_id)).await?;
        self.append(LogEntry::write_started(id, &path)).await?;
        self.append(LogEntry::crashed(id)).await?;
        for payload in payloads {
            self.append(LogEntry::crash_data(id, CrashData::from(payload))).await?;
        }
        Ok(())
    }

    /// Attach a source map stored at `file_name` (shared if the file already
    /// exists), with one original source per entry of `originals`.
    pub async fn add_sourcemap(
        &self,
        recording_id: &str,
        sourcemap_id: &str,
        file_name: &str,
        originals: &[&str],
    ) -> E2eResult<PathBuf> {
        let path = self.path().join(file_name);
        if !path.exists() {
            fs::write(&path, r#"{"version":3,"mappings":""}"#).await?;
            let lookup = reclog_common::types::lookup_path_for(&path);
            fs::write(&lookup, b"{}").await?;
        }

        self.append(LogEntry::SourcemapAdded {
            id: sourcemap_id.to_string(),
            recording_id: recording_id.to_string(),
            path: path.clone(),
            base_url: format!("http://localhost/{}.js", sourcemap_id),
            target_content_hash: Some(format!("sha256:{}", sourcemap_id)),
            target_url_hash: None,
            target_map_url_hash: None,
        })
        .await?;

        for (offset, name) in originals.iter().enumerate() {
            let source = self.path().join(name);
            if !source.exists() {
                fs::write(&source, format!("// {}\n", name)).await?;
            }
            self.append(LogEntry::OriginalSourceAdded {
                recording_id: recording_id.to_string(),
                path: source,
                parent_id: sourcemap_id.to_string(),
                parent_offset: offset as u64,
            })
            .await?;
        }

        Ok(path)
    }

    pub async fn recording(&self, id: &str) -> E2eResult<Recording> {
        Ok(self.registry.find(id).await?)
    }

    pub async fn assert_status(&self, id: &str, expected: RecordingStatus) -> E2eResult<()> {
        let actual = self.recording(id).await?.status;
        if actual != expected {
            return Err(E2eError::AssertionFailed(format!(
                "{} has status {}, expected {}",
                id, actual, expected
            )));
        }
        Ok(())
    }

    /// Upload options that never wait between retries.
    pub fn upload_options(&self, concurrency: usize) -> UploadOptions {
        UploadOptions {
            server: TEST_SERVER.to_string(),
            api_key: Some("test-key".to_string()),
            concurrency,
            cleanup_after_upload: false,
            process_after_upload: false,
            retry: RetryPolicy::immediate(3),
        }
    }

    pub fn uploader(&self, connector: &FakeConnector, options: UploadOptions) -> Uploader {
        Uploader::new(self.registry.clone(), Arc::new(connector.clone()), options)
    }
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Ensure the fixture is consistent before a scenario starts.
pub async fn expect_recordings(workspace: &Workspace, count: usize) -> E2eResult<Vec<Recording>> {
    let recordings = workspace.registry().recordings().await?;
    if recordings.len() != count {
        return Err(E2eError::Fixture(format!(
            "expected {} recordings, found {}",
            count,
            recordings.len()
        )));
    }
    Ok(recordings)
}
