//! Blob upload control plane and read path.
//!
//! Uploads run in three phases: declare the manifest, upload chunks with
//! per-chunk digest verification, then commit once completeness is
//! provable. Reads only ever see committed blobs.

use crate::auth::{require_principal, require_scope, require_vault_owner};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json_body;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use obsync_core::blob::{
    BlobCommitRequest, BlobCommitResponse, BlobInitRequest, BlobInitResponse,
    BlobManifestResponse, ChunkDownloadResponse, ChunkEntry, ChunkUploadRequest,
    ChunkUploadResponse,
};
use obsync_core::hash::{ContentHash, is_plausible_blob_hash};
use obsync_core::ids::VaultId;
use obsync_core::principal::Scope;
use obsync_metadata::models::{BlobChunkRow, BlobRow};
use obsync_storage::chunk_key;
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum request body size for init and commit requests (1 MiB).
const MAX_CONTROL_BODY_SIZE: usize = 1024 * 1024;

/// Slack on top of the base64-inflated chunk limit for JSON framing.
const CHUNK_BODY_OVERHEAD: usize = 64 * 1024;

/// Validate a declared blob hash and normalize it to lowercase.
fn normalize_blob_hash(hash: &str) -> Result<String, String> {
    if !is_plausible_blob_hash(hash) {
        return Err(format!(
            "hash must be {}..{} hex characters",
            obsync_core::MIN_BLOB_HASH_LEN,
            obsync_core::MAX_BLOB_HASH_LEN
        ));
    }
    Ok(hash.to_lowercase())
}

/// POST /v1/vaults/{vault_id}/blobs/init - Declare a blob manifest.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id))]
pub async fn blob_init(
    State(state): State<AppState>,
    Path(vault_id): Path<VaultId>,
    req: Request,
) -> ApiResult<(StatusCode, Json<BlobInitResponse>)> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Write)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let body: BlobInitRequest = read_json_body(req, MAX_CONTROL_BODY_SIZE)
        .await
        .map_err(|message| ApiError::InvalidBlobInit {
            message,
            details: None,
        })?;

    let mut field_errors = serde_json::Map::new();
    let hash = match normalize_blob_hash(&body.hash) {
        Ok(hash) => hash,
        Err(msg) => {
            field_errors.insert("hash".to_string(), msg.into());
            String::new()
        }
    };
    if body.size <= 0 {
        field_errors.insert("size".to_string(), "must be positive".into());
    }
    if body.chunk_count <= 0 {
        field_errors.insert("chunkCount".to_string(), "must be positive".into());
    }
    if body.cipher_alg.is_empty() {
        field_errors.insert("cipherAlg".to_string(), "must not be empty".into());
    }
    if !field_errors.is_empty() {
        return Err(ApiError::InvalidBlobInit {
            message: "blob init failed validation".to_string(),
            details: Some(serde_json::Value::Object(field_errors)),
        });
    }

    state
        .metadata
        .upsert_blob_manifest(&BlobRow {
            blob_hash: hash.clone(),
            size_bytes: body.size,
            chunk_count: body.chunk_count,
            cipher_alg: body.cipher_alg.clone(),
            created_at: OffsetDateTime::now_utc(),
            committed_at: None,
        })
        .await?;

    // The first declaration wins; resume against its chunk count, not the
    // request's.
    let manifest = state
        .metadata
        .lookup_blob(&hash)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("manifest {hash} vanished after upsert")))?;

    let existing: HashSet<i64> = state
        .metadata
        .list_chunks(&hash)
        .await?
        .into_iter()
        .map(|chunk| chunk.idx)
        .collect();
    let missing_indices: Vec<i64> = (0..manifest.chunk_count)
        .filter(|idx| !existing.contains(idx))
        .collect();

    tracing::debug!(
        blob = %hash,
        missing = missing_indices.len(),
        "blob init"
    );

    Ok((
        StatusCode::CREATED,
        Json(BlobInitResponse {
            upload_id: Uuid::new_v4().to_string(),
            hash,
            missing_indices,
        }),
    ))
}

/// PUT /v1/vaults/{vault_id}/blobs/{blob_hash}/chunks/{index} - Upload one chunk.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id, blob = %blob_hash, index))]
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((vault_id, blob_hash, index)): Path<(VaultId, String, i64)>,
    req: Request,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Write)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let blob_hash = normalize_blob_hash(&blob_hash).map_err(|msg| ApiError::InvalidChunk {
        message: msg,
        details: None,
    })?;
    if index < 0 {
        return Err(ApiError::InvalidChunk {
            message: "chunk index must be non-negative".to_string(),
            details: None,
        });
    }

    // Base64 inflates by 4/3; accept that plus envelope overhead.
    let max_body = state.config.server.max_chunk_bytes / 3 * 4 + CHUNK_BODY_OVERHEAD;
    let body: ChunkUploadRequest = read_json_body(req, max_body)
        .await
        .map_err(|message| ApiError::InvalidChunk {
            message,
            details: None,
        })?;

    let declared_hash =
        ContentHash::from_hex(&body.chunk_hash).map_err(|e| ApiError::InvalidChunk {
            message: format!("chunkHash: {e}"),
            details: None,
        })?;
    let bytes: Bytes = BASE64
        .decode(&body.cipher_text_base64)
        .map_err(|e| ApiError::InvalidChunk {
            message: format!("cipherTextBase64: {e}"),
            details: None,
        })?
        .into();

    if bytes.len() > state.config.server.max_chunk_bytes {
        return Err(ApiError::InvalidChunk {
            message: format!(
                "chunk of {} bytes exceeds maximum {}",
                bytes.len(),
                state.config.server.max_chunk_bytes
            ),
            details: None,
        });
    }
    if bytes.len() as i64 != body.size {
        return Err(ApiError::InvalidChunk {
            message: format!(
                "declared size {} does not match ciphertext length {}",
                body.size,
                bytes.len()
            ),
            details: Some(serde_json::json!({
                "declaredSize": body.size,
                "actualSize": bytes.len(),
            })),
        });
    }

    if state.metadata.lookup_blob(&blob_hash).await?.is_none() {
        return Err(ApiError::BlobNotFound);
    }

    // Integrity gate: nothing durable happens on a digest mismatch.
    let actual = ContentHash::compute(&bytes);
    if actual != declared_hash {
        return Err(ApiError::ChunkHashMismatch {
            expected: declared_hash.to_hex(),
            actual: actual.to_hex(),
        });
    }

    let storage_key = chunk_key(&blob_hash, index);
    state.chunks.put(&storage_key, bytes).await?;

    state
        .metadata
        .upsert_chunk(&BlobChunkRow {
            blob_hash: blob_hash.clone(),
            idx: index,
            chunk_hash: declared_hash.to_hex(),
            size_bytes: body.size,
            storage_key,
            received_at: OffsetDateTime::now_utc(),
        })
        .await?;

    Ok(Json(ChunkUploadResponse {
        blob_hash,
        index,
        persisted: true,
    }))
}

/// POST /v1/vaults/{vault_id}/blobs/{blob_hash}/commit - Publish a blob.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id, blob = %blob_hash))]
pub async fn commit_blob(
    State(state): State<AppState>,
    Path((vault_id, blob_hash)): Path<(VaultId, String)>,
    req: Request,
) -> ApiResult<Json<BlobCommitResponse>> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Write)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let blob_hash = normalize_blob_hash(&blob_hash).map_err(|msg| ApiError::InvalidBlobCommit {
        message: msg,
    })?;

    let body: BlobCommitRequest = read_json_body(req, MAX_CONTROL_BODY_SIZE)
        .await
        .map_err(|message| ApiError::InvalidBlobCommit { message })?;

    if body.hash.to_lowercase() != blob_hash {
        return Err(ApiError::InvalidBlobCommit {
            message: "body hash does not match the blob hash in the path".to_string(),
        });
    }
    if body.expected_chunk_count < 0 || body.expected_size < 0 {
        return Err(ApiError::InvalidBlobCommit {
            message: "expected counts must be non-negative".to_string(),
        });
    }

    if state.metadata.lookup_blob(&blob_hash).await?.is_none() {
        return Err(ApiError::BlobNotFound);
    }

    // Declared values are minimum thresholds: a client that uploaded more
    // than it declared is not rejected.
    let tally = state.metadata.count_chunks(&blob_hash).await?;
    if tally.count < body.expected_chunk_count || tally.total_size < body.expected_size {
        return Err(ApiError::BlobIncomplete {
            current_count: tally.count,
            current_size: tally.total_size,
            expected_count: body.expected_chunk_count,
            expected_size: body.expected_size,
        });
    }

    state
        .metadata
        .mark_blob_committed(&blob_hash, OffsetDateTime::now_utc())
        .await?;

    tracing::info!(blob = %blob_hash, chunks = tally.count, "blob committed");

    Ok(Json(BlobCommitResponse {
        hash: blob_hash,
        committed: true,
    }))
}

/// GET /v1/vaults/{vault_id}/blobs/{blob_hash} - Read a committed manifest.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id, blob = %blob_hash))]
pub async fn get_blob_manifest(
    State(state): State<AppState>,
    Path((vault_id, blob_hash)): Path<(VaultId, String)>,
    req: Request,
) -> ApiResult<Json<BlobManifestResponse>> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Read)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let blob_hash = blob_hash.to_lowercase();
    let blob = state
        .metadata
        .lookup_blob(&blob_hash)
        .await?
        .filter(|b| b.committed_at.is_some())
        .ok_or(ApiError::BlobNotFound)?;

    let chunks = state
        .metadata
        .list_chunks(&blob_hash)
        .await?
        .into_iter()
        .map(|chunk| ChunkEntry {
            index: chunk.idx,
            chunk_hash: chunk.chunk_hash,
            size: chunk.size_bytes,
        })
        .collect();

    Ok(Json(BlobManifestResponse {
        hash: blob.blob_hash,
        size: blob.size_bytes,
        chunk_count: blob.chunk_count,
        cipher_alg: blob.cipher_alg,
        chunks,
    }))
}

/// GET /v1/vaults/{vault_id}/blobs/{blob_hash}/chunks/{index} - Read one chunk.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id, blob = %blob_hash, index))]
pub async fn get_chunk(
    State(state): State<AppState>,
    Path((vault_id, blob_hash, index)): Path<(VaultId, String, i64)>,
    req: Request,
) -> ApiResult<Json<ChunkDownloadResponse>> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Read)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let blob_hash = blob_hash.to_lowercase();
    state
        .metadata
        .lookup_blob(&blob_hash)
        .await?
        .filter(|b| b.committed_at.is_some())
        .ok_or(ApiError::BlobNotFound)?;

    let chunk = state
        .metadata
        .get_chunk(&blob_hash, index)
        .await?
        .ok_or(ApiError::ChunkNotFound)?;

    let bytes = match state.chunks.get(&chunk.storage_key).await {
        Ok(bytes) => bytes,
        Err(obsync_storage::StorageError::NotFound(_)) => return Err(ApiError::ChunkNotFound),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(ChunkDownloadResponse {
        blob_hash,
        index,
        chunk_hash: chunk.chunk_hash,
        size: chunk.size_bytes,
        cipher_text_base64: BASE64.encode(&bytes),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_blob_hash_accepts_digests() {
        let hash = "AB".repeat(32);
        assert_eq!(normalize_blob_hash(&hash).unwrap(), "ab".repeat(32));
    }

    #[test]
    fn normalize_blob_hash_rejects_short_and_non_hex() {
        assert!(normalize_blob_hash("abcd").is_err());
        assert!(normalize_blob_hash(&"zz".repeat(32)).is_err());
    }
}
