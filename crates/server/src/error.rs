//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

/// API error response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// How a client should recover, when recovery is possible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Structured diagnostics (validation fields, completeness tallies).
    /// Request correlation rides the X-Trace-Id response header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("vault not found")]
    VaultNotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid push payload: {message}")]
    InvalidPush {
        message: String,
        details: Option<Value>,
    },

    #[error("invalid blob init payload: {message}")]
    InvalidBlobInit {
        message: String,
        details: Option<Value>,
    },

    #[error("invalid blob commit payload: {message}")]
    InvalidBlobCommit { message: String },

    #[error("invalid chunk payload: {message}")]
    InvalidChunk {
        message: String,
        details: Option<Value>,
    },

    #[error("chunk hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch { expected: String, actual: String },

    #[error("blob incomplete: {current_count} of {expected_count} chunks present")]
    BlobIncomplete {
        current_count: i64,
        current_size: i64,
        expected_count: i64,
        expected_size: i64,
    },

    #[error("blob not found")]
    BlobNotFound,

    #[error("chunk not found")]
    ChunkNotFound,

    #[error("key envelope not found")]
    EnvelopeNotFound,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] obsync_metadata::MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] obsync_storage::StorageError),
}

impl ApiError {
    /// Get the wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::VaultNotFound => "VAULT_NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidPush { .. } => "INVALID_PUSH_PAYLOAD",
            Self::InvalidBlobInit { .. } => "INVALID_BLOB_INIT_PAYLOAD",
            Self::InvalidBlobCommit { .. } => "INVALID_BLOB_COMMIT_PAYLOAD",
            Self::InvalidChunk { .. } => "INVALID_CHUNK_PAYLOAD",
            Self::ChunkHashMismatch { .. } => "CHUNK_HASH_MISMATCH",
            Self::BlobIncomplete { .. } => "BLOB_INCOMPLETE",
            Self::BlobNotFound => "BLOB_NOT_FOUND",
            Self::ChunkNotFound => "CHUNK_NOT_FOUND",
            Self::EnvelopeNotFound => "KEY_ENVELOPE_NOT_FOUND",
            Self::Internal(_) | Self::Metadata(_) | Self::Storage(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::VaultNotFound
            | Self::BlobNotFound
            | Self::ChunkNotFound
            | Self::EnvelopeNotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_)
            | Self::InvalidPush { .. }
            | Self::InvalidBlobInit { .. }
            | Self::InvalidBlobCommit { .. }
            | Self::InvalidChunk { .. } => StatusCode::BAD_REQUEST,
            Self::ChunkHashMismatch { .. } | Self::BlobIncomplete { .. } => StatusCode::CONFLICT,
            Self::Internal(_) | Self::Metadata(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Recovery guidance for retryable kinds.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Unauthorized(_) => Some("refresh the credential and retry"),
            Self::BadRequest(_) => Some("fix the request payload before retrying"),
            Self::InvalidPush { .. }
            | Self::InvalidBlobInit { .. }
            | Self::InvalidBlobCommit { .. }
            | Self::InvalidChunk { .. } => Some("fix the request payload before retrying"),
            Self::ChunkHashMismatch { .. } => {
                Some("recompute the hash on the ciphertext exactly as transmitted and retry")
            }
            Self::BlobIncomplete { .. } => {
                Some("upload the missing chunk indices, then retry the commit")
            }
            Self::Internal(_) | Self::Metadata(_) | Self::Storage(_) => {
                Some("retry with exponential backoff and jitter")
            }
            _ => None,
        }
    }

    /// Structured diagnostics, where the kind carries them.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidPush { details, .. }
            | Self::InvalidBlobInit { details, .. }
            | Self::InvalidChunk { details, .. } => details.clone(),
            Self::ChunkHashMismatch { expected, actual } => Some(serde_json::json!({
                "expected": expected,
                "actual": actual,
            })),
            Self::BlobIncomplete {
                current_count,
                current_size,
                expected_count,
                expected_size,
            } => Some(serde_json::json!({
                "currentCount": current_count,
                "currentSize": current_size,
                "expectedChunkCount": expected_count,
                "expectedSize": expected_size,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Store failures carry internals a client has no use for; log them
        // here with their context and surface only the kind.
        let message = match &self {
            Self::Metadata(e) => {
                tracing::error!(error = %e, "metadata store failure");
                "metadata store failure".to_string()
            }
            Self::Storage(e) => {
                tracing::error!(error = %e, "chunk store failure");
                "chunk store failure".to_string()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
            remediation: self.remediation().map(str::to_string),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_conflicts_are_409() {
        let mismatch = ApiError::ChunkHashMismatch {
            expected: "aa".repeat(32),
            actual: "bb".repeat(32),
        };
        assert_eq!(mismatch.status_code(), StatusCode::CONFLICT);
        assert_eq!(mismatch.code(), "CHUNK_HASH_MISMATCH");

        let incomplete = ApiError::BlobIncomplete {
            current_count: 1,
            current_size: 10,
            expected_count: 2,
            expected_size: 20,
        };
        assert_eq!(incomplete.status_code(), StatusCode::CONFLICT);
        let details = incomplete.details().unwrap();
        assert_eq!(details["currentCount"], 1);
        assert_eq!(details["expectedChunkCount"], 2);
    }

    #[test]
    fn store_errors_map_to_internal() {
        let err = ApiError::Metadata(obsync_metadata::MetadataError::Internal("boom".into()));
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.remediation().is_some());
    }

    #[test]
    fn not_found_kinds_share_404() {
        for err in [
            ApiError::VaultNotFound,
            ApiError::BlobNotFound,
            ApiError::ChunkNotFound,
        ] {
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
            assert!(err.remediation().is_none());
        }
    }
}
