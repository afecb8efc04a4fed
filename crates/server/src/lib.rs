//! HTTP/WebSocket synchronization server for Obsync vaults.
//!
//! This crate provides the server control plane:
//! - Idempotent push ingestion into the append-only op log
//! - Cursor-based pull with watermark advancement
//! - Realtime WebSocket fan-out with backlog replay
//! - Three-phase chunked blob uploads with atomic commit
//! - Scope and ownership enforcement per request

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod realtime;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use realtime::{OpEvent, RealtimeBus};
pub use routes::create_router;
pub use state::AppState;
