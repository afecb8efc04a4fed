//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Vault record. `last_seq` is the vault-scoped sequence allocator; it is
/// only ever advanced inside the append transaction.
#[derive(Debug, Clone, FromRow)]
pub struct VaultRow {
    pub vault_id: Uuid,
    pub owner_id: Uuid,
    pub vault_name: String,
    pub last_seq: i64,
    pub created_at: OffsetDateTime,
}

/// Device record. `public_key` is opaque to the server.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceRow {
    pub device_id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub public_key: String,
    pub created_at: OffsetDateTime,
    pub last_seen_at: Option<OffsetDateTime>,
}

/// A committed operation in a vault's log. `payload` is serialized JSON.
#[derive(Debug, Clone, FromRow)]
pub struct OpRow {
    pub vault_id: Uuid,
    pub seq: i64,
    pub file_id: Option<Uuid>,
    pub op_type: String,
    pub payload: String,
    pub idempotency_key: String,
    pub author_device_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// A new operation about to be appended. The store assigns `seq`;
/// `created_at` is the commit timestamp the caller also hands to
/// subscribers, so log and fan-out agree.
#[derive(Debug, Clone)]
pub struct NewOp {
    pub vault_id: Uuid,
    pub file_id: Option<Uuid>,
    pub op_type: String,
    pub payload: String,
    pub idempotency_key: String,
    pub author_device_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// Result of an append: the assigned (or pre-existing) sequence, and whether
/// the op was newly inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub seq: i64,
    pub was_new: bool,
}

/// Per-device replay watermark for one vault.
#[derive(Debug, Clone, FromRow)]
pub struct CursorRow {
    pub device_id: Uuid,
    pub vault_id: Uuid,
    pub last_applied_seq: i64,
    pub updated_at: OffsetDateTime,
}

/// Blob manifest record. `committed_at` is set exactly once, by commit.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRow {
    pub blob_hash: String,
    pub size_bytes: i64,
    pub chunk_count: i64,
    pub cipher_alg: String,
    pub created_at: OffsetDateTime,
    pub committed_at: Option<OffsetDateTime>,
}

/// One stored chunk of a blob.
#[derive(Debug, Clone, FromRow)]
pub struct BlobChunkRow {
    pub blob_hash: String,
    pub idx: i64,
    pub chunk_hash: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub received_at: OffsetDateTime,
}

/// Aggregate over a blob's stored chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkTally {
    pub count: i64,
    pub total_size: i64,
}

/// Encrypted vault key envelope, opaque to the server.
#[derive(Debug, Clone, FromRow)]
pub struct KeyEnvelopeRow {
    pub vault_id: Uuid,
    pub device_id: Uuid,
    pub version: i64,
    pub encrypted_key: String,
    pub created_at: OffsetDateTime,
}

/// API token record.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub scopes: String, // JSON array
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

impl TokenRow {
    /// Check if the token is usable (not expired or revoked).
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        if let Some(expires_at) = self.expires_at
            && now > expires_at
        {
            return false;
        }
        true
    }
}
