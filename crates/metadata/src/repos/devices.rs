//! Device repository.

use crate::error::MetadataResult;
use crate::models::DeviceRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for device records.
#[async_trait]
pub trait DeviceRepo: Send + Sync {
    /// Create or update a device. Replaces display name and public key,
    /// never the owner.
    async fn upsert_device(&self, device: &DeviceRow) -> MetadataResult<()>;

    /// Get a device by id.
    async fn get_device(&self, device_id: Uuid) -> MetadataResult<Option<DeviceRow>>;

    /// Record an authenticated interaction from the device.
    ///
    /// A no-op for unknown devices: the device id in sync bodies is
    /// self-asserted and may precede registration.
    async fn touch_device(&self, device_id: Uuid, seen_at: OffsetDateTime) -> MetadataResult<()>;
}
