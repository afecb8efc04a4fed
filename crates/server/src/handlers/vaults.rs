//! Vault and device administration surfaces.
//!
//! These are the minimal collaborator endpoints that make the sync core
//! usable end-to-end: vault creation and listing, and device registration.

use crate::auth::{require_principal, require_scope};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json_body;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use obsync_core::ids::DeviceId;
use obsync_core::principal::Scope;
use obsync_metadata::models::{DeviceRow, VaultRow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_ADMIN_BODY_SIZE: usize = 64 * 1024;

/// Request to create a vault.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVaultRequest {
    pub name: String,
}

/// A vault as returned to its owner.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// POST /v1/vaults - Create a vault owned by the caller.
#[tracing::instrument(skip(state, req))]
pub async fn create_vault(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<VaultResponse>)> {
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Admin)?;

    let body: CreateVaultRequest = read_json_body(req, MAX_ADMIN_BODY_SIZE)
        .await
        .map_err(ApiError::BadRequest)?;
    if body.name.is_empty() {
        return Err(ApiError::BadRequest("vault name must not be empty".into()));
    }

    let vault = VaultRow {
        vault_id: Uuid::new_v4(),
        owner_id: principal.user_id,
        vault_name: body.name,
        last_seq: 0,
        created_at: OffsetDateTime::now_utc(),
    };
    state.metadata.create_vault(&vault).await?;

    tracing::info!(vault_id = %vault.vault_id, "vault created");

    Ok((
        StatusCode::CREATED,
        Json(VaultResponse {
            id: vault.vault_id,
            name: vault.vault_name,
            created_at: vault.created_at,
        }),
    ))
}

/// GET /v1/vaults - List the caller's vaults.
#[tracing::instrument(skip(state, req))]
pub async fn list_vaults(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<VaultResponse>>> {
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Read)?;

    let vaults = state
        .metadata
        .list_vaults_for_owner(principal.user_id)
        .await?
        .into_iter()
        .map(|vault| VaultResponse {
            id: vault.vault_id,
            name: vault.vault_name,
            created_at: vault.created_at,
        })
        .collect();

    Ok(Json(vaults))
}

/// Request to register a device.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_id: Option<DeviceId>,
    pub display_name: String,
    #[serde(default)]
    pub public_key: String,
}

/// A registered device.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub device_id: Uuid,
    pub display_name: String,
}

/// POST /v1/devices - Register or update a device bound to the caller.
#[tracing::instrument(skip(state, req))]
pub async fn register_device(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<DeviceResponse>)> {
    let principal = require_principal(&req)?.clone();
    require_scope(&principal, Scope::Write)?;

    let body: RegisterDeviceRequest = read_json_body(req, MAX_ADMIN_BODY_SIZE)
        .await
        .map_err(ApiError::BadRequest)?;

    let device_id = body
        .device_id
        .map(DeviceId::into_uuid)
        .unwrap_or_else(Uuid::new_v4);

    // Re-registration must not move a device between owners.
    if let Some(existing) = state.metadata.get_device(device_id).await?
        && existing.owner_id != principal.user_id
    {
        return Err(ApiError::Forbidden(
            "device belongs to a different principal".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    state
        .metadata
        .upsert_device(&DeviceRow {
            device_id,
            owner_id: principal.user_id,
            display_name: body.display_name.clone(),
            public_key: body.public_key,
            created_at: now,
            last_seen_at: Some(now),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DeviceResponse {
            device_id,
            display_name: body.display_name,
        }),
    ))
}
