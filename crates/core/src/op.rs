//! Operation types for the append-only vault log.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// The kind of an operation in a vault's log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// Incremental markdown document update (payload-opaque).
    MdUpdate,
    /// Logical file creation.
    FileCreate,
    /// Logical file rename.
    FileRename,
    /// Logical file deletion.
    FileDelete,
    /// Reference to a committed blob manifest.
    BlobRef,
    /// Vault key rotation marker.
    KeyRotate,
}

impl OpType {
    /// Parse from the wire string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "md_update" => Ok(Self::MdUpdate),
            "file_create" => Ok(Self::FileCreate),
            "file_rename" => Ok(Self::FileRename),
            "file_delete" => Ok(Self::FileDelete),
            "blob_ref" => Ok(Self::BlobRef),
            "key_rotate" => Ok(Self::KeyRotate),
            _ => Err(crate::Error::UnknownOpType(s.to_string())),
        }
    }

    /// Get the wire string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MdUpdate => "md_update",
            Self::FileCreate => "file_create",
            Self::FileRename => "file_rename",
            Self::FileDelete => "file_delete",
            Self::BlobRef => "blob_ref",
            Self::KeyRotate => "key_rotate",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed operation as served to readers.
///
/// `payload` is schemaless: the server stores and replays it without
/// interpretation. The single exception is `blob_ref`, where the push path
/// reads `payload.blobHash` and `payload.index` for diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Vault-scoped monotonic sequence number assigned at commit.
    pub seq: i64,
    /// Operation kind.
    pub op_type: OpType,
    /// Optional logical file reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Uuid>,
    /// Opaque client payload.
    pub payload: serde_json::Value,
    /// Client-chosen idempotence key.
    pub idempotency_key: String,
    /// Device that authored the operation, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_device_id: Option<Uuid>,
    /// Server commit timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
