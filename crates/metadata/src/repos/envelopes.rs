//! Key envelope repository.
//!
//! Envelopes are opaque to the server: a `(vault, device, version)` keyed
//! blob of ciphertext whose meaning lives entirely on the devices.

use crate::error::MetadataResult;
use crate::models::KeyEnvelopeRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for encrypted vault key envelopes.
#[async_trait]
pub trait KeyEnvelopeRepo: Send + Sync {
    /// Store an envelope. Replaces an existing row for the same
    /// `(vault, device, version)` triple.
    async fn put_envelope(&self, envelope: &KeyEnvelopeRow) -> MetadataResult<()>;

    /// Get a specific envelope version.
    async fn get_envelope(
        &self,
        vault_id: Uuid,
        device_id: Uuid,
        version: i64,
    ) -> MetadataResult<Option<KeyEnvelopeRow>>;

    /// Get the highest-versioned envelope for a device.
    async fn latest_envelope(
        &self,
        vault_id: Uuid,
        device_id: Uuid,
    ) -> MetadataResult<Option<KeyEnvelopeRow>>;
}
