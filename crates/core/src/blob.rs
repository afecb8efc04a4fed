//! Blob upload and download bodies.
//!
//! Blobs are content-addressed ciphertext objects uploaded in three phases:
//! declare the manifest (`init`), upload chunks with per-chunk hash
//! verification (`put-chunk`), then publish atomically once completeness is
//! provable (`commit`).

use serde::{Deserialize, Serialize};

/// Declare a blob manifest before uploading chunks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInitRequest {
    /// Hex digest of the full ciphertext.
    pub hash: String,
    /// Total ciphertext size in bytes.
    pub size: i64,
    /// Number of chunks the blob is split into.
    pub chunk_count: i64,
    /// Cipher algorithm label (opaque to the server).
    pub cipher_alg: String,
}

/// Response to a blob init.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInitResponse {
    /// Fresh opaque id for this upload attempt. Resume state lives entirely
    /// in `missing_indices`; the id is for client-side correlation only.
    pub upload_id: String,
    /// The declared blob hash, echoed.
    pub hash: String,
    /// Chunk indices not yet persisted.
    pub missing_indices: Vec<i64>,
}

/// Upload one chunk's ciphertext.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    /// Hex SHA-256 of the chunk ciphertext exactly as transmitted.
    pub chunk_hash: String,
    /// Chunk ciphertext size in bytes.
    pub size: i64,
    /// Base64-encoded chunk ciphertext.
    pub cipher_text_base64: String,
}

/// Response to a chunk upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub blob_hash: String,
    pub index: i64,
    pub persisted: bool,
}

/// Publish a fully-uploaded blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobCommitRequest {
    /// Must match the blob hash in the request path.
    pub hash: String,
    /// Minimum number of chunks that must be present.
    pub expected_chunk_count: i64,
    /// Minimum total chunk size that must be present.
    pub expected_size: i64,
}

/// Response to a blob commit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobCommitResponse {
    pub hash: String,
    pub committed: bool,
}

/// One chunk entry in a manifest response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    pub index: i64,
    pub chunk_hash: String,
    pub size: i64,
}

/// A committed blob's manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobManifestResponse {
    pub hash: String,
    pub size: i64,
    pub chunk_count: i64,
    pub cipher_alg: String,
    pub chunks: Vec<ChunkEntry>,
}

/// A single chunk's ciphertext, base64-wrapped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDownloadResponse {
    pub blob_hash: String,
    pub index: i64,
    pub chunk_hash: String,
    pub size: i64,
    pub cipher_text_base64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_request_field_names() {
        let json = serde_json::json!({
            "hash": "ab".repeat(32),
            "size": 10,
            "chunkCount": 1,
            "cipherAlg": "AES-256-GCM"
        });
        let req: BlobInitRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.chunk_count, 1);
        assert_eq!(req.cipher_alg, "AES-256-GCM");
    }

    #[test]
    fn commit_response_shape() {
        let value = serde_json::to_value(BlobCommitResponse {
            hash: "cd".repeat(32),
            committed: true,
        })
        .unwrap();
        assert_eq!(value["committed"], true);
        assert!(value.get("hash").is_some());
    }
}
