//! Realtime subscription endpoint.
//!
//! The HTTP upgrade itself is ungated; authentication and ownership run
//! after the socket opens so failures can be reported in-band as an error
//! frame before close. A successful handshake registers the subscription
//! first and replays the backlog second: duplicates across that boundary
//! are possible (clients dedup by seq), gaps are not.

use crate::auth::{WS_AUTH_PROTOCOL, require_vault_owner};
use crate::state::AppState;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Path, Query, State};
use axum::response::Response;
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, StreamExt};
use obsync_core::ids::VaultId;
use obsync_core::principal::{Principal, Scope};
use obsync_core::realtime::{BacklogEvent, ServerFrame};
use obsync_core::{BACKLOG_LIMIT, KEEPALIVE_INTERVAL_SECS};
use serde::Deserialize;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Query parameters for the realtime endpoint.
#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    #[serde(default)]
    pub since: i64,
}

/// GET /v1/vaults/{vault_id}/realtime - WebSocket subscription.
pub async fn realtime_subscribe(
    State(state): State<AppState>,
    Path(vault_id): Path<VaultId>,
    Query(query): Query<RealtimeQuery>,
    principal: Option<Extension<Principal>>,
    ws: WebSocketUpgrade,
) -> Response {
    let vault_id = vault_id.into_uuid();
    let principal = principal.map(|Extension(p)| p);

    // Echo the auth subprotocol when the client offered it; browser
    // WebSocket clients reject an upgrade that ignores their protocols.
    ws.protocols([WS_AUTH_PROTOCOL]).on_upgrade(move |socket| {
        handle_socket(state, vault_id, query.since, principal, socket)
    })
}

/// Gate the subscription after the upgrade completed.
fn gate_error(code: &str, message: &str, remediation: Option<&str>) -> ServerFrame {
    ServerFrame::Error {
        code: code.to_string(),
        message: message.to_string(),
        remediation: remediation.map(str::to_string),
    }
}

async fn admit(
    state: &AppState,
    vault_id: Uuid,
    principal: Option<&Principal>,
) -> Result<(), ServerFrame> {
    let Some(principal) = principal else {
        return Err(gate_error(
            "UNAUTHORIZED",
            "authentication required",
            Some("reconnect with a valid token in the subprotocol list or bearer header"),
        ));
    };
    if !principal.has_scope(Scope::Read) {
        return Err(gate_error(
            "FORBIDDEN",
            "missing required scope: vault:read",
            None,
        ));
    }
    match require_vault_owner(state.metadata.as_ref(), vault_id, principal).await {
        Ok(_) => Ok(()),
        Err(crate::error::ApiError::VaultNotFound) => {
            Err(gate_error("VAULT_NOT_FOUND", "vault not found", None))
        }
        Err(e) => {
            tracing::error!(error = %e, "realtime admission failed");
            Err(gate_error(
                "INTERNAL_ERROR",
                "internal error",
                Some("retry with exponential backoff and jitter"),
            ))
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("frame serialization is infallible");
    sender.send(Message::Text(Utf8Bytes::from(text))).await
}

async fn handle_socket(
    state: AppState,
    vault_id: Uuid,
    since: i64,
    principal: Option<Principal>,
    socket: WebSocket,
) {
    let (mut sender, mut receiver) = socket.split();

    if let Err(frame) = admit(&state, vault_id, principal.as_ref()).await {
        let _ = send_frame(&mut sender, &frame).await;
        let _ = sender.close().await;
        return;
    }

    // Subscribe before reading the backlog so nothing committed in between
    // is lost; an event present in both is deduplicated client-side by seq.
    let mut subscription = state.realtime.subscribe(vault_id);

    let backlog = match state
        .metadata
        .read_ops_since(vault_id, since, BACKLOG_LIMIT)
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, vault_id = %vault_id, "backlog read failed");
            let _ = send_frame(
                &mut sender,
                &gate_error(
                    "INTERNAL_ERROR",
                    "internal error",
                    Some("retry with exponential backoff and jitter"),
                ),
            )
            .await;
            let _ = sender.close().await;
            return;
        }
    };

    let events: Vec<BacklogEvent> = backlog
        .into_iter()
        .filter_map(|row| {
            let op_type = obsync_core::op::OpType::parse(&row.op_type).ok()?;
            let payload = serde_json::from_str(&row.payload).ok()?;
            Some(BacklogEvent {
                seq: row.seq,
                op_type,
                payload,
                created_at: row.created_at,
            })
        })
        .collect();

    if send_frame(&mut sender, &ServerFrame::Backlog { events }).await.is_err() {
        return;
    }

    tracing::debug!(vault_id = %vault_id, since, "realtime subscriber live");

    let mut keepalive = tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
    keepalive.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    // Dropped by the publisher (buffer overflow); the
                    // client must reconnect and reconcile via pull.
                    tracing::debug!(vault_id = %vault_id, "subscription dropped, closing socket");
                    break;
                };
                let frame = ServerFrame::Event {
                    vault_id: event.vault_id,
                    seq: event.seq,
                    op_type: event.op_type,
                    payload: event.payload.clone(),
                    created_at: event.created_at,
                };
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }
            _ = keepalive.tick() => {
                let frame = ServerFrame::Keepalive {
                    ts: OffsetDateTime::now_utc().unix_timestamp(),
                };
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Clients have nothing to say on this socket; pings are
                    // answered by the protocol layer.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.close().await;
    // Subscription drop deregisters from the bus.
}
