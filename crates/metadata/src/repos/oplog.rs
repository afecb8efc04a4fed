//! Append-only operation log repository.

use crate::error::MetadataResult;
use crate::models::{AppendOutcome, NewOp, OpRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for the per-vault operation log.
///
/// The log is append-only: no update, no delete, no reorder. Sequence
/// numbers are vault-scoped, strictly increasing, and gapless for readers.
#[async_trait]
pub trait OpLogRepo: Send + Sync {
    /// Append one operation in a single transaction.
    ///
    /// If the idempotency key already exists anywhere in the log, the
    /// existing sequence is returned with `was_new = false` and nothing is
    /// written. Otherwise the vault's allocator assigns the next sequence
    /// and the row is inserted. Unknown vault ids are `NotFound`.
    async fn append_op(&self, op: &NewOp) -> MetadataResult<AppendOutcome>;

    /// Read ops with `seq > since_seq`, ascending, capped at
    /// `min(limit, 1000)`.
    async fn read_ops_since(
        &self,
        vault_id: Uuid,
        since_seq: i64,
        limit: i64,
    ) -> MetadataResult<Vec<OpRow>>;
}
