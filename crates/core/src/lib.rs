//! Core domain types and shared logic for the Obsync synchronization server.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Vault and device identifiers
//! - Content hashes for blobs and chunks
//! - Operation types and the append-only log's wire shape
//! - Push/pull and blob-upload request/response bodies
//! - Realtime frame envelopes
//! - Principals and authorization scopes

pub mod blob;
pub mod config;
pub mod error;
pub mod hash;
pub mod ids;
pub mod op;
pub mod principal;
pub mod realtime;
pub mod sync;

pub use blob::{
    BlobCommitRequest, BlobCommitResponse, BlobInitRequest, BlobInitResponse,
    BlobManifestResponse, ChunkDownloadResponse, ChunkEntry, ChunkUploadRequest,
    ChunkUploadResponse,
};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use ids::{DeviceId, VaultId};
pub use op::{OpType, Operation};
pub use principal::{AuthType, Principal, Scope};
pub use realtime::ServerFrame;
pub use sync::{ClientOp, MissingChunkRef, PullResponse, PushRequest, PushResponse};

/// Default number of ops returned by a pull when no limit is given.
pub const PULL_DEFAULT_LIMIT: i64 = 200;

/// Hard cap on ops returned by a single pull.
pub const PULL_MAX_LIMIT: i64 = 1000;

/// Maximum ops replayed in a realtime subscription's backlog frame.
pub const BACKLOG_LIMIT: i64 = 500;

/// Seconds between keepalive frames on an open realtime socket.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 20;

/// Minimum accepted length for a blob hash in hex form.
pub const MIN_BLOB_HASH_LEN: usize = 32;

/// Maximum accepted length for a blob hash in hex form.
pub const MAX_BLOB_HASH_LEN: usize = 128;
