//! Sync cursor repository.

use crate::error::MetadataResult;
use crate::models::CursorRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// How an incoming cursor value combines with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPolicy {
    /// Replace the stored value.
    Set,
    /// Keep the larger of stored and incoming.
    Max,
}

/// Repository for per-device replay watermarks.
#[async_trait]
pub trait CursorRepo: Send + Sync {
    /// Insert or update a device's cursor for a vault.
    async fn upsert_cursor(
        &self,
        device_id: Uuid,
        vault_id: Uuid,
        seq: i64,
        policy: CursorPolicy,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Get a device's cursor for a vault.
    async fn get_cursor(
        &self,
        device_id: Uuid,
        vault_id: Uuid,
    ) -> MetadataResult<Option<CursorRow>>;
}
