//! Realtime subscription wire frames.
//!
//! Frames are JSON envelopes discriminated by a `type` field. A subscription
//! opens with a single `backlog` frame, then carries `event` frames in
//! sequence order interleaved with periodic `keepalive` frames. An `error`
//! frame is sent immediately before close when the handshake fails.

use crate::op::OpType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// One committed operation as carried in a backlog frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogEvent {
    pub seq: i64,
    pub op_type: OpType,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A server-to-client frame on a realtime socket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Everything committed after the subscriber's `since`, capped; sent
    /// once, immediately after a successful handshake.
    Backlog { events: Vec<BacklogEvent> },
    /// A single operation committed after subscription.
    #[serde(rename_all = "camelCase")]
    Event {
        vault_id: Uuid,
        seq: i64,
        op_type: OpType,
        payload: Value,
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
    },
    /// Liveness signal while the socket is open.
    Keepalive { ts: i64 },
    /// Terminal diagnostic sent just before close.
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        remediation: Option<String>,
    },
}
