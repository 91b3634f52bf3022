use std::sync::Arc;

use dashmap::DashSet;

use crate::config::HostdConfig;

/// Shared state for the running daemon: configuration plus the set of
/// image uuids currently materialized in the local image cache directory.
pub struct HostState {
    pub config: HostdConfig,
    pub cached_images: DashSet<String>,
}

impl HostState {
    pub fn new(config: HostdConfig) -> Self {
        let cached_images = DashSet::new();
        if let Ok(entries) = std::fs::read_dir(&config.image_cache_dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    cached_images.insert(name.to_string());
                }
            }
        }
        Self { config, cached_images }
    }
}

pub type SharedState = Arc<HostState>;
