//! Key envelope endpoints.
//!
//! The server never interprets an envelope: it is the vault key, encrypted
//! by the client for one device, versioned so rotation can supersede
//! earlier grants.

use crate::auth::{require_principal, require_scope, require_vault_owner};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json_body;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use obsync_core::ids::{DeviceId, VaultId};
use obsync_core::principal::Scope;
use obsync_metadata::models::KeyEnvelopeRow;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_ENVELOPE_BODY_SIZE: usize = 256 * 1024;

/// Request to store a key envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutEnvelopeRequest {
    pub device_id: DeviceId,
    pub version: i64,
    pub encrypted_vault_key: String,
}

/// A stored key envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeResponse {
    pub vault_id: Uuid,
    pub device_id: Uuid,
    pub version: i64,
    pub encrypted_vault_key: String,
}

/// PUT /v1/vaults/{vault_id}/keys - Store an envelope for a device.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id))]
pub async fn put_key_envelope(
    State(state): State<AppState>,
    Path(vault_id): Path<VaultId>,
    req: Request,
) -> ApiResult<(StatusCode, Json<EnvelopeResponse>)> {
    let vault_id = vault_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Write)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let body: PutEnvelopeRequest = read_json_body(req, MAX_ENVELOPE_BODY_SIZE)
        .await
        .map_err(ApiError::BadRequest)?;
    if body.version <= 0 {
        return Err(ApiError::BadRequest("version must be positive".into()));
    }
    if body.encrypted_vault_key.is_empty() {
        return Err(ApiError::BadRequest(
            "encryptedVaultKey must not be empty".into(),
        ));
    }

    let device_id = body.device_id.into_uuid();
    state
        .metadata
        .put_envelope(&KeyEnvelopeRow {
            vault_id,
            device_id,
            version: body.version,
            encrypted_key: body.encrypted_vault_key.clone(),
            created_at: OffsetDateTime::now_utc(),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(EnvelopeResponse {
            vault_id,
            device_id,
            version: body.version,
            encrypted_vault_key: body.encrypted_vault_key,
        }),
    ))
}

/// Query parameters for envelope reads.
#[derive(Debug, Deserialize)]
pub struct EnvelopeQuery {
    pub version: Option<i64>,
}

/// GET /v1/vaults/{vault_id}/keys/{device_id} - Fetch an envelope.
///
/// Returns the latest version unless `?version=` selects one.
#[tracing::instrument(skip(state, req), fields(vault_id = %vault_id, device_id = %device_id))]
pub async fn get_key_envelope(
    State(state): State<AppState>,
    Path((vault_id, device_id)): Path<(VaultId, DeviceId)>,
    Query(query): Query<EnvelopeQuery>,
    req: Request,
) -> ApiResult<Json<EnvelopeResponse>> {
    let vault_id = vault_id.into_uuid();
    let device_id = device_id.into_uuid();
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Read)?;
    require_vault_owner(state.metadata.as_ref(), vault_id, &principal).await?;

    let envelope = match query.version {
        Some(version) => {
            state
                .metadata
                .get_envelope(vault_id, device_id, version)
                .await?
        }
        None => state.metadata.latest_envelope(vault_id, device_id).await?,
    }
    .ok_or(ApiError::EnvelopeNotFound)?;

    Ok(Json(EnvelopeResponse {
        vault_id: envelope.vault_id,
        device_id: envelope.device_id,
        version: envelope.version,
        encrypted_vault_key: envelope.encrypted_key,
    }))
}
