//! Opaque identifiers for vaults and devices.
//!
//! All identifiers are 128-bit values carried on the wire in their canonical
//! textual (UUID) form.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a vault.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(Uuid);

impl VaultId {
    /// Generate a new random vault ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from canonical textual form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid vault ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Consume into the underlying UUID.
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for VaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for VaultId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultId({})", self.0)
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a client device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Generate a new random device ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from canonical textual form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid device ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Consume into the underlying UUID.
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DeviceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        let id = VaultId::new();
        let parsed = VaultId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(VaultId::parse("not-a-uuid").is_err());
        assert!(DeviceId::parse("").is_err());
    }

    #[test]
    fn serde_is_transparent() {
        let id = DeviceId::parse("11111111-1111-4111-8111-111111111111").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"11111111-1111-4111-8111-111111111111\"");
    }
}
