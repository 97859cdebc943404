//! Upload orchestration
//!
//! Uploads recordings to the recording service with bounded concurrency:
//!
//! ```text
//! upload_all ── up to 20 (max 25) recordings at once
//!   └── upload_recording ── strictly sequential steps
//!         └── source maps ── up to 10 at once
//!               └── original sources ── up to 5 at once per source map
//! ```
//!
//! Every pool is created per parent task, so the network fan-out is bounded
//! by the product of the limits rather than by one global limit. Failures
//! are isolated per recording, per source map, and per original source.

use crate::assets;
use crate::config::Config;
use crate::log::LogEntry;
use crate::metadata;
use crate::registry::{ListOptions, Registry};
use crate::retry::{with_retry, RetryPolicy};
use crate::service::{RecordingService, ServiceConnector};
use crate::types::{CrashData, Recording, RecordingStatus, SourceMapEntry};
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_CONCURRENCY: usize = 20;
pub const MAX_BATCH_CONCURRENCY: usize = 25;
pub const SOURCEMAP_CONCURRENCY: usize = 10;
pub const ORIGINAL_SOURCE_CONCURRENCY: usize = 5;

/// Why a recording was left out of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    IneligibleStatus(RecordingStatus),
    MissingFile,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::IneligibleStatus(status) => {
                write!(f, "recording status is {}, nothing to upload", status)
            }
            SkipReason::MissingFile => write!(f, "recording was never written to disk"),
        }
    }
}

/// Decide whether a recording can be uploaded at all.
pub fn check_eligibility(recording: &Recording) -> std::result::Result<(), SkipReason> {
    if !recording.status.is_upload_eligible() {
        return Err(SkipReason::IneligibleStatus(recording.status));
    }
    if recording.path.is_none() && recording.status != RecordingStatus::Crashed {
        return Err(SkipReason::MissingFile);
    }
    Ok(())
}

/// Result of a single successful (or skipped) upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { remote_id: String },
    AlreadyUploaded { remote_id: String },
    CrashReported,
    Skipped(SkipReason),
}

impl UploadOutcome {
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            UploadOutcome::Uploaded { remote_id } | UploadOutcome::AlreadyUploaded { remote_id } => {
                Some(remote_id)
            }
            _ => None,
        }
    }
}

/// Per-recording entry of a batch upload
#[derive(Debug)]
pub struct BatchItem {
    pub recording_id: String,
    pub result: Result<UploadOutcome>,
}

/// Outcome of `Uploader::upload_all`
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    /// True only when every attempted recording succeeded.
    pub fn success(&self) -> bool {
        self.items.iter().all(|item| item.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.items.iter().filter_map(|item| match &item.result {
            Err(e) => Some((item.recording_id.as_str(), e)),
            Ok(_) => None,
        })
    }
}

/// Upload tuning and service credentials
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub server: String,
    pub api_key: Option<String>,
    pub concurrency: usize,
    pub cleanup_after_upload: bool,
    pub process_after_upload: bool,
    pub retry: RetryPolicy,
}

impl UploadOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            api_key: config.api_key.clone(),
            concurrency: config.upload.concurrency,
            cleanup_after_upload: config.upload.cleanup_after_upload,
            process_after_upload: config.upload.process_after_upload,
            retry: RetryPolicy::default().with_max_attempts(config.upload.retry_attempts),
        }
    }

    /// Effective batch width, clamped to `1..=MAX_BATCH_CONCURRENCY`.
    pub fn batch_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_BATCH_CONCURRENCY)
    }
}

/// Drives recordings from disk to the recording service
#[derive(Clone)]
pub struct Uploader {
    registry: Registry,
    connector: Arc<dyn ServiceConnector>,
    options: UploadOptions,
}

impl Uploader {
    pub fn new(registry: Registry, connector: Arc<dyn ServiceConnector>, options: UploadOptions) -> Self {
        Self {
            registry,
            connector,
            options,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload one recording by id.
    pub async fn upload_by_id(&self, id: &str) -> Result<UploadOutcome> {
        let recording = self.registry.find(id).await?;
        self.upload_recording(&recording).await
    }

    /// Upload one recording.
    ///
    /// Already uploaded recordings return their remote id without touching
    /// the network; ineligible ones come back as `Skipped`.
    pub async fn upload_recording(&self, recording: &Recording) -> Result<UploadOutcome> {
        if recording.status == RecordingStatus::Uploaded {
            if let Some(remote_id) = &recording.remote_id {
                debug!("{} already uploaded as {}", recording.id, remote_id);
                return Ok(UploadOutcome::AlreadyUploaded {
                    remote_id: remote_id.clone(),
                });
            }
        }

        if let Err(reason) = check_eligibility(recording) {
            info!("Skipping {}: {}", recording.id, reason);
            return Ok(UploadOutcome::Skipped(reason));
        }

        let service = self
            .connector
            .connect(&self.options.server, self.options.api_key.as_deref())
            .await?;

        let result = self.upload_with(service.as_ref(), recording).await;

        if let Err(e) = service.close().await {
            warn!("Failed to close connection for {}: {}", recording.id, e);
        }

        match &result {
            Ok(outcome) => debug!("Finished {}: {:?}", recording.id, outcome),
            Err(e) => warn!("Upload of {} failed: {}", recording.id, e),
        }
        result
    }

    async fn upload_with(&self, service: &dyn RecordingService, recording: &Recording) -> Result<UploadOutcome> {
        if recording.status == RecordingStatus::Crashed {
            self.upload_crash(service, recording).await?;
            return Ok(UploadOutcome::CrashReported);
        }

        let metadata = metadata::sanitize(&recording.metadata)?;

        let path = recording
            .path
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("{} has no recording file", recording.id)))?;
        let bytes = Bytes::from(fs::read(path).await?);

        let target = service
            .begin_upload(&recording.id, &recording.build_id, bytes.len() as u64)
            .await?;
        let log = self.registry.log();
        log.append(&LogEntry::upload_started(
            &recording.id,
            &self.options.server,
            &target.remote_id,
        ))
        .await?;
        info!("Uploading {} as {} ({} bytes)", recording.id, target.remote_id, bytes.len());

        if !metadata.is_empty() {
            if let Err(e) = service.set_metadata(&target.remote_id, &metadata).await {
                warn!("Failed to set metadata for {}: {}", recording.id, e);
            }
        }

        with_retry(&self.options.retry, "recording upload", || {
            service.upload_bytes(&target.upload_link, bytes.clone())
        })
        .await?;

        service.end_upload(&target.remote_id).await?;

        self.upload_sourcemaps(service, &target.remote_id, recording).await;

        log.append(&LogEntry::upload_finished(&recording.id)).await?;
        info!("Uploaded {} as {}", recording.id, target.remote_id);

        if self.options.process_after_upload {
            match service.wait_for_processed(&target.remote_id).await {
                Ok(None) => debug!("{} processed", target.remote_id),
                Ok(Some(message)) => warn!("Processing {} failed: {}", target.remote_id, message),
                Err(e) => warn!("Could not wait for {} to process: {}", target.remote_id, e),
            }
        }

        if self.options.cleanup_after_upload {
            let all = self.registry.recordings().await?;
            let uploaded = all
                .iter()
                .find(|r| r.id == recording.id)
                .cloned()
                .unwrap_or_else(|| recording.clone());
            if let Err(e) = assets::cleanup(&uploaded, &all).await {
                warn!("Failed to clean up {}: {}", recording.id, e);
            }
        }

        Ok(UploadOutcome::Uploaded {
            remote_id: target.remote_id,
        })
    }

    /// Report each collected crash payload, tagged with the recording it
    /// belongs to. No recording bytes are sent.
    ///
    /// `crashUploaded` is only appended once every payload was accepted. If a
    /// later report fails, the earlier ones have already reached the service
    /// and are sent again on the next attempt.
    async fn upload_crash(&self, service: &dyn RecordingService, recording: &Recording) -> Result<()> {
        let marker = CrashData::recording_metadata(&recording.id);
        let entries = recording.crash_data.as_deref().unwrap_or_default();

        if entries.is_empty() {
            service.report_crash(std::slice::from_ref(&marker)).await?;
        } else {
            for (sent, data) in entries.iter().enumerate() {
                if let Err(e) = service.report_crash(&[data.clone(), marker.clone()]).await {
                    if sent > 0 {
                        warn!(
                            "Crash report {} of {} for {} failed; {} already sent will be resent on retry",
                            sent + 1,
                            entries.len(),
                            recording.id,
                            sent
                        );
                    }
                    return Err(e);
                }
            }
        }

        self.registry
            .log()
            .append(&LogEntry::crash_uploaded(&recording.id, &self.options.server))
            .await?;
        info!("Reported crash for {}", recording.id);
        Ok(())
    }

    /// Upload every source map; returns how many failed.
    async fn upload_sourcemaps(&self, service: &dyn RecordingService, remote_id: &str, recording: &Recording) -> usize {
        let results: Vec<Result<()>> = stream::iter(&recording.sourcemaps)
            .map(|sourcemap| upload_sourcemap(service, remote_id, sourcemap))
            .buffer_unordered(SOURCEMAP_CONCURRENCY)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("{} of {} source maps failed for {}", failed, results.len(), recording.id);
        }
        failed
    }

    /// Upload a batch. Ineligible recordings are skipped; the rest run
    /// concurrently and never abort one another.
    pub async fn upload_all(&self, recordings: Vec<Recording>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut pending = Vec::new();

        for recording in recordings {
            match check_eligibility(&recording) {
                Err(reason) if recording.status != RecordingStatus::Uploaded => {
                    info!("Skipping {}: {}", recording.id, reason);
                }
                _ => pending.push(recording),
            }
        }

        let limit = self.options.batch_concurrency();
        info!("Uploading {} recordings ({} at a time)", pending.len(), limit);

        report.items = stream::iter(pending)
            .map(|recording| async move {
                let result = self.upload_recording(&recording).await;
                BatchItem {
                    recording_id: recording.id,
                    result,
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        for (id, error) in report.failures() {
            warn!("Failed to upload {}: {}", id, error);
        }
        report
    }

    /// Upload every recording selected by `options`.
    pub async fn upload_matching(&self, options: &ListOptions) -> Result<BatchReport> {
        let recordings = self.registry.list(options).await?;
        Ok(self.upload_all(recordings).await)
    }
}

async fn upload_sourcemap(service: &dyn RecordingService, remote_id: &str, sourcemap: &SourceMapEntry) -> Result<()> {
    let result: Result<()> = async {
        let contents = fs::read_to_string(&sourcemap.path).await?;
        let sourcemap_id = service.upload_sourcemap(remote_id, sourcemap, contents).await?;

        let results: Vec<Result<()>> = stream::iter(&sourcemap.original_sources)
            .map(|source| {
                let sourcemap_id = sourcemap_id.as_str();
                async move {
                    let contents = fs::read_to_string(&source.path).await?;
                    service
                        .upload_original_source(remote_id, sourcemap_id, source, contents)
                        .await
                        .map_err(|e| {
                            warn!("Failed to upload original source {:?}: {}", source.path, e);
                            e
                        })
                }
            })
            .buffer_unordered(ORIGINAL_SOURCE_CONCURRENCY)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            debug!("{} original sources failed for source map {}", failed, sourcemap.id);
        }
        Ok(())
    }
    .await;

    if let Err(e) = &result {
        warn!("Failed to upload source map {:?}: {}", sourcemap.path, e);
    }
    result
}
