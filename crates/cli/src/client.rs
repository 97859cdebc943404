//! HTTP client for the recording service
//!
//! Control calls go to `{server}/rpc` as `{"method", "params"}` JSON bodies
//! and answer with `{"result"}` or `{"error": {"message"}}`. Recording bytes
//! are PUT straight to the upload link handed out by `beginRecordingUpload`.

use async_trait::async_trait;
use bytes::Bytes;
use reclog_common::{
    CrashData, Error, Metadata, OriginalSource, RecordingService, Result, ServiceConnector, SourceMapEntry,
    UploadTarget,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Map a dispatch address to the HTTP base the RPC endpoint lives under.
pub fn http_base(server: &str) -> String {
    let base = if let Some(rest) = server.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = server.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        server.to_string()
    };
    base.trim_end_matches('/').to_string()
}

/// Opens `HttpRecordingService` connections
#[derive(Default)]
pub struct HttpConnector;

#[async_trait]
impl ServiceConnector for HttpConnector {
    async fn connect(&self, server: &str, api_key: Option<&str>) -> Result<Box<dyn RecordingService>> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Connection {
                server: server.to_string(),
                message: e.to_string(),
            })?;

        Ok(Box::new(HttpRecordingService {
            http_client,
            server: server.to_string(),
            endpoint: format!("{}/rpc", http_base(server)),
            api_key: api_key.map(str::to_string),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeginUploadResult {
    recording_id: String,
    upload_link: String,
}

#[derive(Debug, Deserialize)]
struct SourceMapResult {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessedResult {
    #[serde(default)]
    error: Option<String>,
}

/// One session against the recording service
pub struct HttpRecordingService {
    http_client: reqwest::Client,
    server: String,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRecordingService {
    fn connection_error(&self, e: reqwest::Error) -> Error {
        Error::Connection {
            server: self.server.clone(),
            message: e.to_string(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        debug!("{} {}", method, self.endpoint);

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&json!({ "method": method, "params": params }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| self.connection_error(e))?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(Error::Service(format!("{} returned {}", method, status)));
        }

        let body: RpcResponse = resp.json().await.map_err(|e| self.connection_error(e))?;
        if let Some(error) = body.error {
            return Err(Error::Service(format!("{}: {}", method, error.message)));
        }
        if !status.is_success() {
            return Err(Error::Service(format!("{} returned {}", method, status)));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn call_as<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl RecordingService for HttpRecordingService {
    async fn begin_upload(&self, recording_id: &str, build_id: &str, byte_length: u64) -> Result<UploadTarget> {
        let result: BeginUploadResult = self
            .call_as(
                "Internal.beginRecordingUpload",
                json!({
                    "recordingId": recording_id,
                    "buildId": build_id,
                    "length": byte_length,
                }),
            )
            .await?;
        Ok(UploadTarget {
            remote_id: result.recording_id,
            upload_link: result.upload_link,
        })
    }

    async fn upload_bytes(&self, upload_link: &str, bytes: Bytes) -> Result<()> {
        let len = bytes.len();
        let resp = self
            .http_client
            .put(upload_link)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Transfer(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Transfer(format!("upload of {} bytes returned {}", len, resp.status())));
        }
        Ok(())
    }

    async fn end_upload(&self, remote_id: &str) -> Result<()> {
        self.call("Internal.endRecordingUpload", json!({ "recordingId": remote_id }))
            .await?;
        Ok(())
    }

    async fn upload_sourcemap(&self, remote_id: &str, sourcemap: &SourceMapEntry, contents: String) -> Result<String> {
        let result: SourceMapResult = self
            .call_as(
                "Recording.addSourceMap",
                json!({
                    "recordingId": remote_id,
                    "baseURL": sourcemap.base_url,
                    "targetContentHash": sourcemap.target_content_hash,
                    "targetURLHash": sourcemap.target_url_hash,
                    "targetMapURLHash": sourcemap.target_map_url_hash,
                    "contents": contents,
                }),
            )
            .await?;
        Ok(result.id)
    }

    async fn upload_original_source(
        &self,
        remote_id: &str,
        sourcemap_id: &str,
        source: &OriginalSource,
        contents: String,
    ) -> Result<()> {
        self.call(
            "Recording.addOriginalSource",
            json!({
                "recordingId": remote_id,
                "parentId": sourcemap_id,
                "parentOffset": source.parent_offset,
                "contents": contents,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_metadata(&self, remote_id: &str, metadata: &Metadata) -> Result<()> {
        self.call(
            "Internal.setRecordingMetadata",
            json!({ "recordingId": remote_id, "metadata": metadata }),
        )
        .await?;
        Ok(())
    }

    async fn report_crash(&self, data: &[CrashData]) -> Result<()> {
        self.call("Internal.reportCrash", json!({ "data": data })).await?;
        Ok(())
    }

    async fn wait_for_processed(&self, remote_id: &str) -> Result<Option<String>> {
        let result: Option<ProcessedResult> = self
            .call_as("Recording.waitForProcessed", json!({ "recordingId": remote_id }))
            .await?;
        Ok(result.unwrap_or_default().error)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
