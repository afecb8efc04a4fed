//! Blob manifest and chunk index repository.

use crate::error::MetadataResult;
use crate::models::{BlobChunkRow, BlobRow, ChunkTally};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for blob manifests and their chunk index.
#[async_trait]
pub trait BlobRepo: Send + Sync {
    /// Declare a blob manifest. A no-op when the hash is already known;
    /// the original declaration wins.
    async fn upsert_blob_manifest(&self, blob: &BlobRow) -> MetadataResult<()>;

    /// Look up a manifest by hash.
    async fn lookup_blob(&self, blob_hash: &str) -> MetadataResult<Option<BlobRow>>;

    /// Mark a blob committed. Idempotent; the first commit timestamp wins.
    async fn mark_blob_committed(
        &self,
        blob_hash: &str,
        committed_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Record a stored chunk. Replace-on-conflict: re-uploading a verified
    /// index overwrites the previous row.
    async fn upsert_chunk(&self, chunk: &BlobChunkRow) -> MetadataResult<()>;

    /// Count stored chunks and sum their sizes.
    async fn count_chunks(&self, blob_hash: &str) -> MetadataResult<ChunkTally>;

    /// List stored chunks ordered by index.
    async fn list_chunks(&self, blob_hash: &str) -> MetadataResult<Vec<BlobChunkRow>>;

    /// Get one stored chunk by blob hash and index.
    async fn get_chunk(&self, blob_hash: &str, idx: i64) -> MetadataResult<Option<BlobChunkRow>>;
}
