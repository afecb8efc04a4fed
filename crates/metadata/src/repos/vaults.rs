//! Vault repository.

use crate::error::MetadataResult;
use crate::models::VaultRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for vault records.
#[async_trait]
pub trait VaultRepo: Send + Sync {
    /// Create a vault. Fails on duplicate id.
    async fn create_vault(&self, vault: &VaultRow) -> MetadataResult<()>;

    /// Get a vault by id.
    async fn get_vault(&self, vault_id: Uuid) -> MetadataResult<Option<VaultRow>>;

    /// List all vaults owned by a principal, newest first.
    async fn list_vaults_for_owner(&self, owner_id: Uuid) -> MetadataResult<Vec<VaultRow>>;
}
