//! API token repository.

use crate::error::MetadataResult;
use crate::models::TokenRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for API tokens and bootstrap bookkeeping.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    /// Create a token record.
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()>;

    /// Look up a token by its hash.
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>>;

    /// Update a token's last-used timestamp.
    async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()>;

    /// Revoke a token.
    async fn revoke_token(&self, token_id: Uuid, revoked_at: OffsetDateTime)
    -> MetadataResult<()>;

    /// Get the token id recorded by the last admin bootstrap, if any.
    async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>>;

    /// Record the admin bootstrap token id.
    async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()>;
}
