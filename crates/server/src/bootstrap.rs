//! Admin token initialization.

use anyhow::{Result, bail};
use obsync_core::config::AdminConfig;
use obsync_core::principal::Scope;
use obsync_metadata::MetadataStore;
use obsync_metadata::models::TokenRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Ensure the configured admin token exists, rotating the previous one if
/// the configured hash changed between restarts.
pub async fn ensure_admin_token(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    // Normalize to lowercase to match the middleware's hex encoding.
    let hash = config
        .token_hash
        .strip_prefix("sha256:")
        .unwrap_or(&config.token_hash)
        .to_lowercase();
    let hash = hash.as_str();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }

    if let Some(existing) = metadata.get_token_by_hash(hash).await? {
        let now = OffsetDateTime::now_utc();
        if !existing.is_valid(now) {
            bail!(
                "admin token hash matches a revoked or expired token (id={}); \
                 use a new token hash",
                existing.token_id
            );
        }
        metadata.set_bootstrap_token_id(existing.token_id).await?;
        tracing::debug!("admin token already exists");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    if let Some(prev_id) = metadata.get_bootstrap_token_id().await? {
        metadata.revoke_token(prev_id, now).await?;
        tracing::info!(token_id = %prev_id, "previous admin token revoked");
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: config.user_id,
        token_hash: hash.to_string(),
        scopes: serde_json::to_string(&[Scope::Admin.as_str()])?,
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: config.token_description.clone(),
    };

    metadata.create_token(&token).await?;
    metadata.set_bootstrap_token_id(token.token_id).await?;
    tracing::info!(token_id = %token.token_id, "admin token created");

    Ok(())
}
