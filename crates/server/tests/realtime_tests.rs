//! Integration tests for the realtime WebSocket endpoint.

mod common;

use common::TestServer;
use common::server::json_request;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const DEVICE: &str = "11111111-1111-4111-8111-111111111111";

async fn connect(
    addr: std::net::SocketAddr,
    vault: uuid::Uuid,
    since: i64,
    bearer: Option<&str>,
    subprotocol_token: Option<&str>,
) -> WsStream {
    let url = format!("ws://{addr}/v1/vaults/{vault}/realtime?since={since}");
    let mut request = url.into_client_request().unwrap();

    if let Some(token) = bearer {
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {token}").parse().unwrap(),
        );
    }
    if let Some(token) = subprotocol_token {
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            format!("obsync-auth, {token}").parse().unwrap(),
        );
    }

    let (stream, _response) = connect_async(request).await.expect("websocket connect");
    stream
}

/// Read the next JSON frame, failing the test on timeout or close.
async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");

        if message.is_text() {
            return serde_json::from_str(message.to_text().unwrap()).unwrap();
        }
        // Skip protocol-level frames (ping/pong).
    }
}

fn push_op(key: &str) -> Value {
    json!({
        "deviceId": DEVICE,
        "cursor": 0,
        "ops": [{
            "idempotencyKey": key,
            "opType": "md_update",
            "payload": {"path": "a.md", "yUpdateBase64": "AQID"}
        }]
    })
}

#[tokio::test]
async fn fan_out_after_empty_backlog() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;
    let addr = server.spawn().await;

    // Device D1 subscribes before anything was committed.
    let mut ws = connect(addr, vault, 0, Some(&token), None).await;

    let backlog = next_frame(&mut ws).await;
    assert_eq!(backlog["type"], "backlog");
    assert_eq!(backlog["events"].as_array().unwrap().len(), 0);

    // Device D2 pushes one op through the HTTP surface.
    let (_, push) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(push_op("op-1")),
        Some(&token),
    )
    .await;
    assert_eq!(push["appliedCount"], 1);

    let event = next_frame(&mut ws).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["seq"], 1);
    assert_eq!(event["opType"], "md_update");
    assert_eq!(event["vaultId"], vault.to_string());
    assert_eq!(event["payload"]["yUpdateBase64"], "AQID");
}

#[tokio::test]
async fn backlog_replays_missed_ops_in_order() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    for i in 1..=3 {
        json_request(
            &server.router,
            "POST",
            &format!("/v1/vaults/{vault}/sync/push"),
            Some(push_op(&format!("op-{i}"))),
            Some(&token),
        )
        .await;
    }

    let addr = server.spawn().await;
    // Subscribe from seq 1: ops 2 and 3 replay, op 1 does not.
    let mut ws = connect(addr, vault, 1, Some(&token), None).await;

    let backlog = next_frame(&mut ws).await;
    assert_eq!(backlog["type"], "backlog");
    let seqs: Vec<i64> = backlog["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![2, 3]);

    // Live events continue the same strictly increasing sequence.
    json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(push_op("op-4")),
        Some(&token),
    )
    .await;
    let event = next_frame(&mut ws).await;
    assert_eq!(event["seq"], 4);
}

#[tokio::test]
async fn subprotocol_token_authenticates() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;
    let addr = server.spawn().await;

    let mut ws = connect(addr, vault, 0, None, Some(&token)).await;

    let backlog = next_frame(&mut ws).await;
    assert_eq!(backlog["type"], "backlog");
}

#[tokio::test]
async fn missing_credential_gets_error_frame_before_close() {
    let server = TestServer::new().await;
    let (user, _) = server.create_user_token(&["vault:read"]).await;
    let vault = server.create_vault_for(user).await;
    let addr = server.spawn().await;

    let mut ws = connect(addr, vault, 0, None, None).await;

    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "UNAUTHORIZED");
    assert!(error["remediation"].is_string());

    // The server closes right after the error envelope.
    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for close");
    match next {
        None => {}
        Some(Ok(message)) => assert!(message.is_close(), "unexpected frame: {message:?}"),
        Some(Err(_)) => {}
    }
}

#[tokio::test]
async fn foreign_vault_gets_not_found_frame() {
    let server = TestServer::new().await;
    let (owner, _) = server.create_user_token(&["vault:read"]).await;
    let vault = server.create_vault_for(owner).await;
    let (_, other_token) = server.create_user_token(&["vault:read"]).await;
    let addr = server.spawn().await;

    let mut ws = connect(addr, vault, 0, Some(&other_token), None).await;

    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "VAULT_NOT_FOUND");
}

#[tokio::test]
async fn write_only_scope_gets_forbidden_frame() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write"]).await;
    let vault = server.create_vault_for(user).await;
    let addr = server.spawn().await;

    let mut ws = connect(addr, vault, 0, Some(&token), None).await;

    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "FORBIDDEN");
}

#[tokio::test]
async fn no_cross_vault_fanout() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault_a = server.create_vault_for(user).await;
    let vault_b = server.create_vault_for(user).await;
    let addr = server.spawn().await;

    let mut ws = connect(addr, vault_a, 0, Some(&token), None).await;
    let backlog = next_frame(&mut ws).await;
    assert_eq!(backlog["type"], "backlog");

    // A push into vault B must not reach vault A's subscriber.
    json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault_b}/sync/push"),
        Some(push_op("b-1")),
        Some(&token),
    )
    .await;
    json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault_a}/sync/push"),
        Some(push_op("a-1")),
        Some(&token),
    )
    .await;

    let event = next_frame(&mut ws).await;
    assert_eq!(event["vaultId"], vault_a.to_string());
    assert_eq!(event["seq"], 1);
}
