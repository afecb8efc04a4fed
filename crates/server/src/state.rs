//! Application state shared across handlers.

use crate::realtime::RealtimeBus;
use obsync_core::config::AppConfig;
use obsync_metadata::MetadataStore;
use obsync_storage::ChunkStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Chunk object store.
    pub chunks: Arc<dyn ChunkStore>,
    /// Realtime fan-out bus.
    pub realtime: RealtimeBus,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        chunks: Arc<dyn ChunkStore>,
    ) -> Self {
        let realtime = RealtimeBus::new(config.server.subscriber_buffer);
        Self {
            config: Arc::new(config),
            metadata,
            chunks,
            realtime,
        }
    }
}
