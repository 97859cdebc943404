//! Instrumented in-memory recording service

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reclog_common::{
    CrashData, Error, Metadata, OriginalSource, RecordingService, Result, ServiceConnector, SourceMapEntry,
    UploadTarget,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything the fake service was asked to do
#[derive(Debug, Default, Clone)]
pub struct ServiceCalls {
    pub connections: usize,
    pub failed_connections: usize,
    pub closes: usize,
    /// Local recording ids passed to `begin_upload`
    pub begun: Vec<String>,
    /// Upload links that received bytes, with the byte count
    pub transfers: Vec<(String, usize)>,
    pub transfer_attempts: usize,
    pub ended: Vec<String>,
    pub sourcemaps: Vec<PathBuf>,
    pub original_sources: Vec<PathBuf>,
    pub metadata: HashMap<String, Metadata>,
    pub crash_reports: Vec<Vec<CrashData>>,
    pub processed: Vec<String>,
}

#[derive(Default)]
struct Failures {
    connects: usize,
    transfers: HashSet<String>,
    metadata: HashSet<String>,
    crash_reports_after: Option<usize>,
    sourcemaps: HashSet<PathBuf>,
    original_sources: HashSet<PathBuf>,
    processing: HashMap<String, String>,
}

struct Inner {
    calls: Mutex<ServiceCalls>,
    failures: Mutex<Failures>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    transfer_delay: Duration,
}

/// Hands out connections to one shared fake service.
///
/// A connection counts as in flight from `connect` until `close`, which
/// matches one recording upload in the orchestrator.
#[derive(Clone)]
pub struct FakeConnector {
    inner: Arc<Inner>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_transfer_delay(Duration::ZERO)
    }

    /// Every byte transfer sleeps for `delay`, so concurrent uploads overlap.
    pub fn with_transfer_delay(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: Mutex::new(ServiceCalls::default()),
                failures: Mutex::new(Failures::default()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                transfer_delay: delay,
            }),
        }
    }

    /// Remote id the fake assigns to a local recording.
    pub fn remote_id_for(recording_id: &str) -> String {
        format!("remote-{}", recording_id)
    }

    pub fn upload_link_for(recording_id: &str) -> String {
        format!("fake://upload/{}", Self::remote_id_for(recording_id))
    }

    /// Refuse the next `count` connections.
    pub fn fail_connects(&self, count: usize) {
        self.inner.failures.lock().connects = count;
    }

    /// Make every byte transfer for this recording fail.
    pub fn fail_transfers_for(&self, recording_id: &str) {
        self.inner
            .failures
            .lock()
            .transfers
            .insert(Self::upload_link_for(recording_id));
    }

    pub fn fail_metadata_for(&self, recording_id: &str) {
        self.inner
            .failures
            .lock()
            .metadata
            .insert(Self::remote_id_for(recording_id));
    }

    /// Accept `accepted` crash reports, then reject the rest.
    pub fn fail_crash_reports_after(&self, accepted: usize) {
        self.inner.failures.lock().crash_reports_after = Some(accepted);
    }

    pub fn fail_sourcemap(&self, path: impl Into<PathBuf>) {
        self.inner.failures.lock().sourcemaps.insert(path.into());
    }

    pub fn fail_original_source(&self, path: impl Into<PathBuf>) {
        self.inner.failures.lock().original_sources.insert(path.into());
    }

    /// Report `message` as the processing error for this recording.
    pub fn fail_processing_for(&self, recording_id: &str, message: &str) {
        self.inner
            .failures
            .lock()
            .processing
            .insert(Self::remote_id_for(recording_id), message.to_string());
    }

    pub fn calls(&self) -> ServiceCalls {
        self.inner.calls.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceConnector for FakeConnector {
    async fn connect(&self, server: &str, _api_key: Option<&str>) -> Result<Box<dyn RecordingService>> {
        let refused = {
            let mut failures = self.inner.failures.lock();
            let refused = failures.connects > 0;
            failures.connects = failures.connects.saturating_sub(1);
            refused
        };
        if refused {
            self.inner.calls.lock().failed_connections += 1;
            return Err(Error::Connection {
                server: server.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.calls.lock().connections += 1;
        Ok(Box::new(FakeService {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct FakeService {
    inner: Arc<Inner>,
}

#[async_trait]
impl RecordingService for FakeService {
    async fn begin_upload(&self, recording_id: &str, _build_id: &str, _byte_length: u64) -> Result<UploadTarget> {
        self.inner.calls.lock().begun.push(recording_id.to_string());
        Ok(UploadTarget {
            remote_id: FakeConnector::remote_id_for(recording_id),
            upload_link: FakeConnector::upload_link_for(recording_id),
        })
    }

    async fn upload_bytes(&self, upload_link: &str, bytes: Bytes) -> Result<()> {
        self.inner.calls.lock().transfer_attempts += 1;
        if !self.inner.transfer_delay.is_zero() {
            tokio::time::sleep(self.inner.transfer_delay).await;
        }
        if self.inner.failures.lock().transfers.contains(upload_link) {
            return Err(Error::Transfer(format!("connection reset uploading to {}", upload_link)));
        }
        self.inner
            .calls
            .lock()
            .transfers
            .push((upload_link.to_string(), bytes.len()));
        Ok(())
    }

    async fn end_upload(&self, remote_id: &str) -> Result<()> {
        self.inner.calls.lock().ended.push(remote_id.to_string());
        Ok(())
    }

    async fn upload_sourcemap(&self, _remote_id: &str, sourcemap: &SourceMapEntry, _contents: String) -> Result<String> {
        if self.inner.failures.lock().sourcemaps.contains(&sourcemap.path) {
            return Err(Error::Service(format!("rejected source map {:?}", sourcemap.path)));
        }
        self.inner.calls.lock().sourcemaps.push(sourcemap.path.clone());
        Ok(format!("map-{}", sourcemap.id))
    }

    async fn upload_original_source(
        &self,
        _remote_id: &str,
        _sourcemap_id: &str,
        source: &OriginalSource,
        _contents: String,
    ) -> Result<()> {
        if self.inner.failures.lock().original_sources.contains(&source.path) {
            return Err(Error::Service(format!("rejected original source {:?}", source.path)));
        }
        self.inner.calls.lock().original_sources.push(source.path.clone());
        Ok(())
    }

    async fn set_metadata(&self, remote_id: &str, metadata: &Metadata) -> Result<()> {
        if self.inner.failures.lock().metadata.contains(remote_id) {
            return Err(Error::Service(format!("metadata rejected for {}", remote_id)));
        }
        self.inner
            .calls
            .lock()
            .metadata
            .insert(remote_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn report_crash(&self, data: &[CrashData]) -> Result<()> {
        let limit = self.inner.failures.lock().crash_reports_after;
        let mut calls = self.inner.calls.lock();
        if limit.map_or(false, |limit| calls.crash_reports.len() >= limit) {
            return Err(Error::Service("crash report rejected".to_string()));
        }
        calls.crash_reports.push(data.to_vec());
        Ok(())
    }

    async fn wait_for_processed(&self, remote_id: &str) -> Result<Option<String>> {
        self.inner.calls.lock().processed.push(remote_id.to_string());
        Ok(self.inner.failures.lock().processing.get(remote_id).cloned())
    }

    async fn close(&self) -> Result<()> {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.calls.lock().closes += 1;
        Ok(())
    }
}
