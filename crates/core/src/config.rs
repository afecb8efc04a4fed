//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8750").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum number of ops accepted in one push batch.
    #[serde(default = "default_max_push_batch")]
    pub max_push_batch: usize,
    /// Maximum decoded chunk size in bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// Per-subscriber realtime buffer, in events. A subscriber whose buffer
    /// fills is dropped rather than blocking the publisher.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8750".to_string()
}

fn default_max_push_batch() -> usize {
    200
}

fn default_max_chunk_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_subscriber_buffer() -> usize {
    128
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_push_batch: default_max_push_batch(),
            max_chunk_bytes: default_max_chunk_bytes(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Chunk object store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for chunk objects.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO and other S3-compatibles).
        endpoint: Option<String>,
        /// Region (defaults to us-east-1 when unset).
        region: Option<String>,
        /// Key prefix inside the bucket.
        prefix: Option<String>,
        /// Static access key id. When unset the default credential chain is
        /// used; setting only one half of the pair is a config error.
        access_key_id: Option<String>,
        /// Static secret access key.
        secret_access_key: Option<String>,
        /// Use path-style addressing (required by most S3-compatibles).
        #[serde(default)]
        force_path_style: bool,
    },
}

impl StorageConfig {
    /// Validate internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Filesystem { .. } => Ok(()),
            Self::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 bucket must not be empty".to_string());
                }
                if access_key_id.is_some() != secret_access_key.is_some() {
                    return Err(
                        "access_key_id and secret_access_key must be set together".to_string()
                    );
                }
                Ok(())
            }
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite, for single-node deployments and tests.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL, for production deployments.
    Postgres {
        /// Connection URL.
        url: String,
        /// Pool size.
        #[serde(default = "default_pg_max_connections")]
        max_connections: u32,
    },
}

fn default_pg_max_connections() -> u32 {
    16
}

/// Admin bootstrap configuration.
///
/// The admin token provides initial access to create vaults and register
/// devices. If the token hash changes between restarts, the previous admin
/// token is revoked and a new one is created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA-256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// User identity the admin token resolves to. Must stay stable across
    /// restarts, since vaults created through it are owned by this id.
    pub user_id: Uuid,
    /// Description for the admin token.
    pub token_description: Option<String>,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA-256 of "test-admin-token"
            token_hash: "9f735e0df9a1ddc702bf0a1a7b83033f9f7153a00c29de82cedadc9957289b05"
                .to_string(),
            user_id: Uuid::from_u128(0xA0A0_A0A0_A0A0_4A0A_8A0A_A0A0A0A0A0A0),
            token_description: Some("Test admin token".to_string()),
        }
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub metadata: MetadataConfig,
    pub admin: AdminConfig,
}
