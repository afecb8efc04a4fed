//! Chunk store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Object store abstraction for content-addressed chunk storage.
///
/// Chunks are bounded single objects addressed by exact key; there is no
/// streaming or listing surface. `put` must be effectively atomic: a reader
/// either sees the complete object or none at all, even across a crash.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend, for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends
    /// that don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Storage key for one chunk of a blob.
pub fn chunk_key(blob_hash: &str, index: i64) -> String {
    format!("blobs/{blob_hash}/{index}.bin")
}
