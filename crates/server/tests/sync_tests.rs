//! Integration tests for push ingestion and cursor-based pull.

mod common;

use axum::http::StatusCode;
use common::TestServer;
use common::server::json_request;
use serde_json::json;

const DEVICE: &str = "11111111-1111-4111-8111-111111111111";

fn md_update(key: &str, path: &str) -> serde_json::Value {
    json!({
        "idempotencyKey": key,
        "deviceId": DEVICE,
        "path": path,
        "opType": "md_update",
        "logicalClock": 1,
        "payload": {"path": path, "yUpdateBase64": "AQID"},
        "createdAt": "2026-01-01T00:00:00Z"
    })
}

fn push_body(ops: Vec<serde_json::Value>) -> serde_json::Value {
    json!({"deviceId": DEVICE, "cursor": 0, "ops": ops})
}

#[tokio::test]
async fn push_pull_round_trip() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(push_body(vec![md_update("op-1", "a.md")])),
        Some(&token),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledgedSeq"], 1);
    assert_eq!(body["appliedCount"], 1);
    assert_eq!(body["rebaseRequired"], false);
    assert_eq!(body["missingChunks"].as_array().unwrap().len(), 0);

    let (status, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0&deviceId={DEVICE}"),
        None,
        Some(&token),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["watermark"], 1);
    let ops = body["ops"].as_array().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0]["seq"], 1);
    assert_eq!(ops[0]["opType"], "md_update");
    assert_eq!(ops[0]["payload"]["path"], "a.md");
    assert_eq!(ops[0]["payload"]["yUpdateBase64"], "AQID");
}

#[tokio::test]
async fn replayed_batch_is_a_no_op() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    let batch = push_body(vec![md_update("op-1", "a.md")]);
    let push_uri = format!("/v1/vaults/{vault}/sync/push");

    let (status, first) =
        json_request(&server.router, "POST", &push_uri, Some(batch.clone()), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["appliedCount"], 1);

    let (status, replay) =
        json_request(&server.router, "POST", &push_uri, Some(batch), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["appliedCount"], 0);
    assert_eq!(replay["acknowledgedSeq"], 1);

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(body["ops"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn sequences_are_strictly_increasing_and_gapless() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;
    let push_uri = format!("/v1/vaults/{vault}/sync/push");

    // Three batches, one with a replayed op mixed in.
    for (batch_idx, keys) in [vec!["op-1", "op-2"], vec!["op-2", "op-3"], vec!["op-4"]]
        .iter()
        .enumerate()
    {
        let ops = keys.iter().map(|k| md_update(k, "a.md")).collect();
        let (status, _) =
            json_request(&server.router, "POST", &push_uri, Some(push_body(ops)), Some(&token))
                .await;
        assert_eq!(status, StatusCode::OK, "batch {batch_idx}");
    }

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&token),
    )
    .await;

    let seqs: Vec<i64> = body["ops"]
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn gapless_visibility_after_push() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    let ops = (0..5).map(|i| md_update(&format!("op-{i}"), "b.md")).collect();
    let (_, push) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(push_body(ops)),
        Some(&token),
    )
    .await;
    assert_eq!(push["appliedCount"], 5);

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(body["ops"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn cursor_is_non_decreasing_across_push_and_pull() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;
    let device = uuid::Uuid::parse_str(DEVICE).unwrap();

    let mut last_cursor = 0;
    for i in 0..4 {
        let (_, _) = json_request(
            &server.router,
            "POST",
            &format!("/v1/vaults/{vault}/sync/push"),
            Some(push_body(vec![md_update(&format!("op-{i}"), "c.md")])),
            Some(&token),
        )
        .await;

        let (_, _) = json_request(
            &server.router,
            "GET",
            &format!("/v1/vaults/{vault}/sync/pull?since={last_cursor}&deviceId={DEVICE}"),
            None,
            Some(&token),
        )
        .await;

        let cursor = server
            .metadata()
            .get_cursor(device, vault)
            .await
            .unwrap()
            .unwrap()
            .last_applied_seq;
        assert!(cursor >= last_cursor, "cursor regressed: {cursor} < {last_cursor}");
        last_cursor = cursor;
    }
    assert_eq!(last_cursor, 4);
}

#[tokio::test]
async fn pull_clamps_limit_and_pages() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    let ops = (0..7).map(|i| md_update(&format!("op-{i}"), "d.md")).collect();
    json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(push_body(ops)),
        Some(&token),
    )
    .await;

    // Page of 3, then continue from the watermark.
    let (_, page1) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0&limit=3"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(page1["ops"].as_array().unwrap().len(), 3);
    assert_eq!(page1["watermark"], 3);

    let (_, page2) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=3&limit=100"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(page2["ops"].as_array().unwrap().len(), 4);
    assert_eq!(page2["watermark"], 7);

    // Caught up: empty page, watermark echoes since.
    let (_, page3) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=7"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(page3["ops"].as_array().unwrap().len(), 0);
    assert_eq!(page3["watermark"], 7);
}

#[tokio::test]
async fn push_validation_reports_field_details() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write"]).await;
    let vault = server.create_vault_for(user).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(json!({"deviceId": DEVICE, "cursor": 0, "ops": []})),
        Some(&token),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PUSH_PAYLOAD");
    assert!(body["details"]["ops"].is_string());
}

#[tokio::test]
async fn blob_ref_reports_missing_blob() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;
    let blob_hash = "ab".repeat(32);

    let op = json!({
        "idempotencyKey": "ref-1",
        "opType": "blob_ref",
        "payload": {"blobHash": blob_hash, "index": 0, "path": "img.png"}
    });

    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(push_body(vec![op])),
        Some(&token),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    // The op is still recorded; the diagnostic is advisory.
    assert_eq!(body["appliedCount"], 1);
    let missing = body["missingChunks"].as_array().unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0]["blobHash"], blob_hash);
    assert_eq!(missing[0]["index"], 0);

    let (_, pulled) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(pulled["ops"][0]["opType"], "blob_ref");
}

#[tokio::test]
async fn push_to_someone_elses_vault_is_hidden() {
    let server = TestServer::new().await;
    let (owner, _) = server.create_user_token(&["vault:write"]).await;
    let vault = server.create_vault_for(owner).await;
    let (_, intruder_token) = server.create_user_token(&["vault:write"]).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(push_body(vec![md_update("op-1", "a.md")])),
        Some(&intruder_token),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "VAULT_NOT_FOUND");
}
