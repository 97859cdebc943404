//! reclog configuration
//!
//! Configuration is a plain value passed into every operation. Reading the
//! process environment and command line is left to the binary.

use crate::log::EventLog;
use crate::registry::Registry;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SERVER: &str = "wss://dispatch.replay.io";
pub const DEFAULT_VIEW_SERVER: &str = "https://app.replay.io";
pub const LOG_FILE_NAME: &str = "recordings.log";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding recordings and the event log
    pub recordings_dir: PathBuf,

    /// Recording service endpoint
    pub server: String,

    /// API key presented to the recording service
    pub api_key: Option<String>,

    /// Base URL recordings are viewed at
    pub view_server: String,

    /// Upload pipeline tuning
    pub upload: UploadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recordings_dir: crate::default_store_path(),
            server: DEFAULT_SERVER.to_string(),
            api_key: None,
            view_server: DEFAULT_VIEW_SERVER.to_string(),
            upload: UploadConfig::default(),
        }
    }
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Recordings uploaded at once
    pub concurrency: usize,

    /// Attempts for each byte transfer
    pub retry_attempts: u32,

    /// Delete local files once a recording is uploaded
    pub cleanup_after_upload: bool,

    /// Wait for server-side processing after each upload
    pub process_after_upload: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::upload::DEFAULT_BATCH_CONCURRENCY,
            retry_attempts: 5,
            cleanup_after_upload: false,
            process_after_upload: false,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        crate::default_store_path().join("config.toml")
    }

    /// Get the event log path
    pub fn log_path(&self) -> PathBuf {
        self.recordings_dir.join(LOG_FILE_NAME)
    }

    pub fn event_log(&self) -> EventLog {
        EventLog::new(self.log_path())
    }

    pub fn registry(&self) -> Registry {
        Registry::new(self.event_log())
    }
}
