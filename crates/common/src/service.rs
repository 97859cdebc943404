//! Remote recording service interface
//!
//! The orchestrator only talks to the network through these traits. The CLI
//! supplies an HTTP implementation; tests supply instrumented fakes.

use crate::types::{CrashData, Metadata, OriginalSource, SourceMapEntry};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Destination handed out when an upload begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub remote_id: String,
    pub upload_link: String,
}

/// An open connection to the recording service
#[async_trait]
pub trait RecordingService: Send + Sync {
    /// Reserve a remote recording sized for `byte_length` bytes.
    async fn begin_upload(
        &self,
        recording_id: &str,
        build_id: &str,
        byte_length: u64,
    ) -> Result<UploadTarget>;

    async fn upload_bytes(&self, upload_link: &str, bytes: Bytes) -> Result<()>;

    async fn end_upload(&self, remote_id: &str) -> Result<()>;

    /// Returns the service-side id of the stored source map.
    async fn upload_sourcemap(
        &self,
        remote_id: &str,
        sourcemap: &SourceMapEntry,
        contents: String,
    ) -> Result<String>;

    async fn upload_original_source(
        &self,
        remote_id: &str,
        sourcemap_id: &str,
        source: &OriginalSource,
        contents: String,
    ) -> Result<()>;

    async fn set_metadata(&self, remote_id: &str, metadata: &Metadata) -> Result<()>;

    async fn report_crash(&self, data: &[CrashData]) -> Result<()>;

    /// Block until the service has processed the recording. `Some` carries
    /// the processing error reported by the service.
    async fn wait_for_processed(&self, remote_id: &str) -> Result<Option<String>>;

    async fn close(&self) -> Result<()>;
}

/// Opens connections to a recording service
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    async fn connect(&self, server: &str, api_key: Option<&str>) -> Result<Box<dyn RecordingService>>;
}
