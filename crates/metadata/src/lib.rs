//! Relational metadata persistence for Obsync.
//!
//! This crate owns every durable record except chunk bytes themselves:
//! vaults, devices, the append-only op log with its vault-scoped sequence
//! allocator, per-device sync cursors, blob manifests and the chunk index,
//! key envelopes, and API tokens.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use repos::{
    BlobRepo, CursorPolicy, CursorRepo, DeviceRepo, KeyEnvelopeRepo, OpLogRepo, TokenRepo,
    VaultRepo,
};
pub use store::{MetadataStore, SqliteStore};

use obsync_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store))
        }
        MetadataConfig::Postgres {
            url,
            max_connections,
        } => {
            let store = PostgresStore::new(url, *max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}
