//! CLI Commands

pub mod list;
pub mod metadata;
pub mod remove;
pub mod upload;
pub mod view;

use reclog_common::{Config, Registry, UploadOptions, Uploader};
use std::sync::Arc;

use crate::client::HttpConnector;

/// Resolved settings shared by every command
pub struct Context {
    pub config: Config,
    pub registry: Registry,
}

impl Context {
    pub fn new(config: Config) -> Self {
        let registry = config.registry();
        Self { config, registry }
    }

    pub fn uploader(&self) -> Uploader {
        self.uploader_with(UploadOptions::from_config(&self.config))
    }

    pub fn uploader_with(&self, options: UploadOptions) -> Uploader {
        Uploader::new(self.registry.clone(), Arc::new(HttpConnector), options)
    }
}
