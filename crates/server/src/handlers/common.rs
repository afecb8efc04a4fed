//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use obsync_core::op::{OpType, Operation};
use obsync_metadata::models::OpRow;
use serde::de::DeserializeOwned;

/// Read and deserialize a JSON request body.
///
/// The error is a plain message; callers wrap it in the endpoint's own
/// payload-validation kind so every surface reports its own code.
pub async fn read_json_body<T: DeserializeOwned>(
    req: Request,
    max_size: usize,
) -> Result<T, String> {
    let bytes = axum::body::to_bytes(req.into_body(), max_size)
        .await
        .map_err(|e| format!("failed to read body: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON: {e}"))
}

/// Convert a stored op row into its wire shape.
///
/// The payload was serialized by the push path; a row that fails to parse
/// back is store corruption, not a client error.
pub fn op_row_to_operation(row: OpRow) -> ApiResult<Operation> {
    let op_type = OpType::parse(&row.op_type)
        .map_err(|e| ApiError::Internal(format!("corrupt op row seq {}: {e}", row.seq)))?;
    let payload = serde_json::from_str(&row.payload)
        .map_err(|e| ApiError::Internal(format!("corrupt op payload seq {}: {e}", row.seq)))?;

    Ok(Operation {
        seq: row.seq,
        op_type,
        file_id: row.file_id,
        payload,
        idempotency_key: row.idempotency_key,
        author_device_id: row.author_device_id,
        created_at: row.created_at,
    })
}
