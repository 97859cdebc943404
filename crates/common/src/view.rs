//! Opening uploaded recordings in a browser

use crate::registry::Registry;
use crate::types::RecordingStatus;
use crate::upload::{UploadOutcome, Uploader};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Opens a URL for the user
#[async_trait]
pub trait UrlOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<()>;
}

/// Uses the platform's default URL handler
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

#[async_trait]
impl UrlOpener for SystemOpener {
    async fn open(&self, url: &str) -> Result<()> {
        let mut cmd = if cfg!(target_os = "macos") {
            let mut cmd = tokio::process::Command::new("open");
            cmd.arg(url);
            cmd
        } else if cfg!(target_os = "windows") {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.args(["/C", "start", "", url]);
            cmd
        } else {
            let mut cmd = tokio::process::Command::new("xdg-open");
            cmd.arg(url);
            cmd
        };

        let status = cmd.status().await?;
        if !status.success() {
            return Err(Error::Internal(format!("failed to open {}: {}", url, status)));
        }
        Ok(())
    }
}

/// URL an uploaded recording can be viewed at
pub fn view_url(view_server: &str, remote_id: &str) -> String {
    format!("{}/recording/{}", view_server.trim_end_matches('/'), remote_id)
}

/// Uploads a recording if needed and opens it
pub struct Viewer<O> {
    uploader: Uploader,
    view_server: String,
    opener: O,
}

impl<O: UrlOpener> Viewer<O> {
    pub fn new(uploader: Uploader, view_server: impl Into<String>, opener: O) -> Self {
        Self {
            uploader,
            view_server: view_server.into(),
            opener,
        }
    }

    fn registry(&self) -> &Registry {
        self.uploader.registry()
    }

    /// Upload (if needed) and open a recording.
    ///
    /// Crashed recordings only get their crash report sent and count as
    /// viewed. Returns `false` when the recording is ineligible or the upload
    /// failed.
    pub async fn view_recording(&self, id: &str) -> Result<bool> {
        let recording = self.registry().find(id).await?;

        if recording.status == RecordingStatus::CrashUploaded {
            info!("Recording {} crashed and its report was already sent", id);
            return Ok(true);
        }

        let remote_id = match self.uploader.upload_recording(&recording).await {
            Ok(UploadOutcome::Uploaded { remote_id }) | Ok(UploadOutcome::AlreadyUploaded { remote_id }) => {
                remote_id
            }
            Ok(UploadOutcome::CrashReported) => {
                info!("Recording {} crashed, sent a crash report instead", id);
                return Ok(true);
            }
            Ok(UploadOutcome::Skipped(reason)) => {
                info!("Cannot view {}: {}", id, reason);
                return Ok(false);
            }
            Err(e) => {
                warn!("Cannot view {}: {}", id, e);
                return Ok(false);
            }
        };

        let url = view_url(&self.view_server, &remote_id);
        debug!("Opening {}", url);
        self.opener.open(&url).await?;
        Ok(true)
    }
}
