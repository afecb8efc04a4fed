//! Push and pull request/response bodies.

use crate::ids::DeviceId;
use crate::op::{OpType, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single operation as submitted by a client.
///
/// Clients attach their own causal metadata (`logicalClock`, `path`, local
/// timestamps) alongside the fields the server persists; unknown fields are
/// tolerated and ignored, and anything the client wants replayed must live
/// inside `payload`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOp {
    /// Globally unique idempotence key; retried batches coalesce on it.
    pub idempotency_key: String,
    /// Operation kind.
    pub op_type: OpType,
    /// Opaque payload replayed to other devices verbatim.
    pub payload: Value,
    /// Optional logical file reference.
    #[serde(default)]
    pub file_id: Option<Uuid>,
}

/// Batch of operations pushed by one device.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// The pushing device (self-asserted).
    pub device_id: DeviceId,
    /// The device's last applied sequence before this batch.
    #[serde(default)]
    pub cursor: i64,
    /// Operations in application order.
    pub ops: Vec<ClientOp>,
}

/// Diagnostic for a `blob_ref` op whose blob is missing or uncommitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingChunkRef {
    /// The referenced blob hash.
    pub blob_hash: String,
    /// Chunk index, when the payload named one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

/// Server response to a push.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Highest sequence assigned to (or already held by) ops in the batch.
    pub acknowledged_seq: i64,
    /// Number of ops newly appended (replays excluded).
    pub applied_count: u64,
    /// Diagnostics for blob references that cannot yet be resolved.
    pub missing_chunks: Vec<MissingChunkRef>,
    /// Reserved; always false.
    pub rebase_required: bool,
}

/// Server response to a pull.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Highest sequence contained in `ops`, or the request's `since` when
    /// the vault has nothing newer.
    pub watermark: i64,
    /// Operations with `seq` strictly greater than the request's `since`,
    /// ascending.
    pub ops: Vec<Operation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_op_tolerates_unknown_fields() {
        let json = serde_json::json!({
            "idempotencyKey": "op-1",
            "deviceId": "11111111-1111-4111-8111-111111111111",
            "path": "a.md",
            "opType": "md_update",
            "logicalClock": 1,
            "payload": {"path": "a.md", "yUpdateBase64": "AQID"},
            "createdAt": "2026-01-01T00:00:00Z"
        });
        let op: ClientOp = serde_json::from_value(json).unwrap();
        assert_eq!(op.idempotency_key, "op-1");
        assert_eq!(op.op_type, OpType::MdUpdate);
        assert_eq!(op.payload["yUpdateBase64"], "AQID");
        assert!(op.file_id.is_none());
    }

    #[test]
    fn push_request_cursor_defaults_to_zero() {
        let json = serde_json::json!({
            "deviceId": "11111111-1111-4111-8111-111111111111",
            "ops": []
        });
        let req: PushRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.cursor, 0);
    }

    #[test]
    fn missing_chunk_ref_omits_absent_index() {
        let diag = MissingChunkRef {
            blob_hash: "ab".repeat(32),
            index: None,
        };
        let value = serde_json::to_value(&diag).unwrap();
        assert!(value.get("index").is_none());
        assert!(value.get("blobHash").is_some());
    }
}
