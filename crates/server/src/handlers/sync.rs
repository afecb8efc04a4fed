//! Push ingestion and cursor-based pull.

use crate::auth::{require_principal, require_scope, require_vault_owner};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{op_row_to_operation, read_json_body};
use crate::realtime::OpEvent;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use obsync_core::ids::{DeviceId, VaultId};
use obsync_core::op::OpType;
use obsync_core::principal::Scope;
use obsync_core::sync::{MissingChunkRef, PullResponse, PushRequest, PushResponse};
use obsync_core::{PULL_DEFAULT_LIMIT, PULL_MAX_LIMIT};
use obsync_metadata::CursorPolicy;
use obsync_metadata::models::NewOp;
use serde::Deserialize;
use time::OffsetDateTime;

/// Maximum request body size for push batches (8 MiB).
const MAX_PUSH_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Validate a push batch before touching the log.
fn validate_push(body: &PushRequest, max_batch: usize) -> ApiResult<()> {
    let mut field_errors = serde_json::Map::new();

    if body.ops.is_empty() {
        field_errors.insert(
            "ops".to_string(),
            "must contain at least one operation".into(),
        );
    }
    if body.ops.len() > max_batch {
        field_errors.insert(
            "ops".to_string(),
            format!("batch of {} exceeds maximum {}", body.ops.len(), max_batch).into(),
        );
    }
    if body.cursor < 0 {
        field_errors.insert("cursor".to_string(), "must be non-negative".into());
    }
    for (i, op) in body.ops.iter().enumerate() {
        if op.idempotency_key.is_empty() {
            field_errors.insert(format!("ops[{i}].idempotencyKey"), "must not be empty".into());
        }
    }

    if field_errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidPush {
            message: "push batch failed validation".to_string(),
            details: Some(serde_json::Value::Object(field_errors)),
        })
    }
}

/// Missing-blob diagnostic for a `blob_ref` op.
///
/// `payload.blobHash` and `payload.index` are the only payload fields the
/// server ever reads. An opaque payload without a string `blobHash` yields
/// no diagnostic; the op itself is still recorded.
async fn blob_ref_diagnostic(
    state: &AppState,
    payload: &serde_json::Value,
) -> ApiResult<Option<MissingChunkRef>> {
    let Some(blob_hash) = payload.get("blobHash").and_then(|v| v.as_str()) else {
        return Ok(None);
    };

    let blob = state.metadata.lookup_blob(&blob_hash.to_lowercase()).await?;
    let resolved = blob.map(|b| b.committed_at.is_some()).unwrap_or(false);
    if resolved {
        return Ok(None);
    }

    Ok(Some(MissingChunkRef {
        blob_hash: blob_hash.to_string(),
        index: payload.get("index").and_then(|v| v.as_i64()),
    }))
}

/// POST /v1/vaults/{vault_id}/sync/push - Ingest a batch of operations.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id))]
pub async fn push(
    State(state): State<AppState>,
    Path(vault_id): Path<VaultId>,
    req: Request,
) -> ApiResult<Json<PushResponse>> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Write)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let body: PushRequest = read_json_body(req, MAX_PUSH_BODY_SIZE)
        .await
        .map_err(|message| ApiError::InvalidPush {
            message,
            details: None,
        })?;
    validate_push(&body, state.config.server.max_push_batch)?;

    let device_id = body.device_id.into_uuid();
    let now = OffsetDateTime::now_utc();
    let mut acknowledged_seq: i64 = 0;
    let mut applied_count: u64 = 0;
    let mut missing_chunks = Vec::new();

    // Ops apply sequentially in declared order. Each append is its own
    // committed transaction, so publishing right after it returns is
    // publishing post-commit.
    for op in &body.ops {
        let payload = serde_json::to_string(&op.payload)
            .map_err(|e| ApiError::Internal(format!("payload serialization: {e}")))?;

        let outcome = state
            .metadata
            .append_op(&NewOp {
                vault_id,
                file_id: op.file_id,
                op_type: op.op_type.as_str().to_string(),
                payload,
                idempotency_key: op.idempotency_key.clone(),
                author_device_id: Some(device_id),
                created_at: now,
            })
            .await?;

        if outcome.was_new {
            applied_count += 1;
            state.realtime.publish(OpEvent {
                vault_id,
                seq: outcome.seq,
                op_type: op.op_type,
                payload: op.payload.clone(),
                created_at: now,
            });
        }

        if op.op_type == OpType::BlobRef
            && let Some(diag) = blob_ref_diagnostic(&state, &op.payload).await?
        {
            missing_chunks.push(diag);
        }

        acknowledged_seq = acknowledged_seq.max(outcome.seq);
    }

    state
        .metadata
        .upsert_cursor(device_id, vault_id, acknowledged_seq, CursorPolicy::Set, now)
        .await?;
    state.metadata.touch_device(device_id, now).await?;

    tracing::debug!(
        acknowledged_seq,
        applied_count,
        replayed = body.ops.len() as u64 - applied_count,
        "push ingested"
    );

    Ok(Json(PushResponse {
        acknowledged_seq,
        applied_count,
        missing_chunks,
        rebase_required: false,
    }))
}

/// Query parameters for pull.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    #[serde(default)]
    pub since: i64,
    pub limit: Option<i64>,
    pub device_id: Option<DeviceId>,
}

/// GET /v1/vaults/{vault_id}/sync/pull - Serve ops after a cursor.
///
/// Never blocks waiting for new ops; an empty response means "caught up"
/// and liveness is the realtime endpoint's concern.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id, since = query.since))]
pub async fn pull(
    State(state): State<AppState>,
    Path(vault_id): Path<VaultId>,
    Query(query): Query<PullQuery>,
    req: Request,
) -> ApiResult<Json<PullResponse>> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Read)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let limit = query
        .limit
        .unwrap_or(PULL_DEFAULT_LIMIT)
        .min(PULL_MAX_LIMIT);
    let rows = state
        .metadata
        .read_ops_since(vault_id, query.since, limit)
        .await?;

    let watermark = rows.last().map(|row| row.seq).unwrap_or(query.since);

    if let Some(device_id) = query.device_id {
        let device_id = device_id.into_uuid();
        let now = OffsetDateTime::now_utc();
        state
            .metadata
            .upsert_cursor(device_id, vault_id, watermark, CursorPolicy::Max, now)
            .await?;
        state.metadata.touch_device(device_id, now).await?;
    }

    let ops = rows
        .into_iter()
        .map(op_row_to_operation)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(PullResponse { watermark, ops }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsync_core::sync::ClientOp;

    fn batch(ops: Vec<ClientOp>) -> PushRequest {
        PushRequest {
            device_id: DeviceId::new(),
            cursor: 0,
            ops,
        }
    }

    fn op(key: &str) -> ClientOp {
        ClientOp {
            idempotency_key: key.to_string(),
            op_type: OpType::MdUpdate,
            payload: serde_json::json!({}),
            file_id: None,
        }
    }

    #[test]
    fn validate_rejects_empty_batch() {
        let err = validate_push(&batch(vec![]), 100).unwrap_err();
        match err {
            ApiError::InvalidPush { details, .. } => {
                assert!(details.unwrap().get("ops").is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_oversized_batch() {
        let ops = (0..3).map(|i| op(&format!("op-{i}"))).collect();
        assert!(validate_push(&batch(ops), 2).is_err());
    }

    #[test]
    fn validate_names_the_offending_op() {
        let err = validate_push(&batch(vec![op("ok"), op("")]), 100).unwrap_err();
        match err {
            ApiError::InvalidPush { details, .. } => {
                let details = details.unwrap();
                assert!(details.get("ops[1].idempotencyKey").is_some());
                assert!(details.get("ops[0].idempotencyKey").is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_well_formed_batch() {
        validate_push(&batch(vec![op("op-1"), op("op-2")]), 100).unwrap();
    }
}
