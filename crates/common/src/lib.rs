//! reclog common library
//!
//! Local recording bookkeeping: the append-only event log, the registry folded
//! from it, asset reference tracking, and the upload orchestrator.

pub mod assets;
pub mod config;
pub mod error;
pub mod filter;
pub mod log;
pub mod metadata;
pub mod registry;
pub mod retry;
pub mod service;
pub mod types;
pub mod upload;
pub mod view;

// Re-export commonly used types
pub use assets::{remove_all_recordings, remove_recording, CleanupStats};
pub use config::Config;
pub use error::{Error, Result};
pub use filter::RecordingPredicate;
pub use log::{EventLog, LogEntry};
pub use registry::{ListOptions, Registry};
pub use service::{RecordingService, ServiceConnector, UploadTarget};
pub use types::*;
pub use upload::{BatchReport, UploadOptions, UploadOutcome, Uploader};
pub use view::{SystemOpener, UrlOpener, Viewer};

/// reclog version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default recordings directory
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".replay")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
