//! Authentication and access-gate middleware.
//!
//! Tokens arrive as `Authorization: Bearer <token>` or, for the realtime
//! endpoint, as the entry following `obsync-auth` in the WebSocket
//! subprotocol list. The middleware resolves the token to a [`Principal`]
//! request extension; handlers enforce scopes and vault ownership.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use axum::middleware::Next;
use axum::response::Response;
use obsync_core::principal::{AuthType, Principal, Scope};
use obsync_metadata::MetadataStore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs. Longer values are truncated to prevent log
/// bloat and log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Subprotocol name carrying the realtime auth token.
pub const WS_AUTH_PROTOCOL: &str = "obsync-auth";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, sanitized to
    /// printable ASCII and truncated.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() { Self::new() } else { Self(sanitized) }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract bearer token from the Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// Extract the token from the WebSocket subprotocol list.
///
/// Clients that cannot set headers (browser WebSocket API) offer
/// `["obsync-auth", "<token>"]`; the token is the entry following the
/// protocol name.
fn extract_ws_protocol_token(req: &Request) -> Option<String> {
    let mut entries = req
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim);

    entries
        .by_ref()
        .find(|entry| entry.eq_ignore_ascii_case(WS_AUTH_PROTOCOL))?;
    entries.next().map(str::to_string)
}

/// Extract trace ID from the X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Hash a token for storage lookup.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Authentication middleware: resolves the presented token to a Principal
/// extension and sets up trace context. Requests without a valid credential
/// pass through without a Principal; handlers decide whether that is fatal.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let token_str =
        extract_bearer_token(&req).map(str::to_string).or_else(|| extract_ws_protocol_token(&req));

    if let Some(token_str) = token_str {
        let token_hash = hash_token(&token_str);

        if let Some(token_row) = state.metadata.get_token_by_hash(&token_hash).await? {
            let now = OffsetDateTime::now_utc();
            if !token_row.is_valid(now) {
                return Err(ApiError::Unauthorized(
                    "token expired or revoked".to_string(),
                ));
            }

            let scope_names: Vec<String> = serde_json::from_str(&token_row.scopes)
                .map_err(|e| ApiError::Internal(format!("invalid token scopes: {e}")))?;

            let scopes: HashSet<Scope> = scope_names
                .iter()
                .filter_map(|s| match Scope::parse(s) {
                    Ok(scope) => Some(scope),
                    Err(_) => {
                        tracing::warn!(
                            token_id = %token_row.token_id,
                            invalid_scope = %s,
                            "token contains invalid scope, ignoring"
                        );
                        None
                    }
                })
                .collect();

            // Update last used time (fire and forget).
            let metadata = state.metadata.clone();
            let token_id = token_row.token_id;
            tokio::spawn(async move {
                let _ = metadata.touch_token(token_id, OffsetDateTime::now_utc()).await;
            });

            req.extensions_mut().insert(Principal {
                user_id: token_row.user_id,
                scopes,
                auth_type: AuthType::ApiToken,
            });
        }
    }

    let mut response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    if let Ok(value) = trace_id_str.parse() {
        response.headers_mut().insert("x-trace-id", value);
    }

    Ok(response)
}

/// Require an authenticated principal on the request.
pub fn require_principal(req: &Request) -> ApiResult<&Principal> {
    req.extensions()
        .get::<Principal>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Require a scope, honoring the admin-implies-all hierarchy.
pub fn require_scope(principal: &Principal, scope: Scope) -> ApiResult<()> {
    if principal.has_scope(scope) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "missing required scope: {scope}"
        )))
    }
}

/// Require that the principal owns the vault.
///
/// Absent and not-owned collapse into the same error so callers cannot
/// probe for vault existence.
pub async fn require_vault_owner(
    metadata: &dyn MetadataStore,
    vault_id: Uuid,
    principal: &Principal,
) -> ApiResult<obsync_metadata::models::VaultRow> {
    let vault = metadata
        .get_vault(vault_id)
        .await?
        .ok_or(ApiError::VaultNotFound)?;

    if vault.owner_id != principal.user_id {
        return Err(ApiError::VaultNotFound);
    }
    Ok(vault)
}
