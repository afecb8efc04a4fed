//! Integration tests for authentication and the access gate.

mod common;

use axum::http::StatusCode;
use common::TestServer;
use common::server::json_request;
use serde_json::json;

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let server = TestServer::new().await;
    let (user, _) = server.create_user_token(&["vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    let (status, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(body["remediation"].is_string());
}

#[tokio::test]
async fn unknown_token_is_unauthorized() {
    let server = TestServer::new().await;
    let (user, _) = server.create_user_token(&["vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    let (status, _) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some("not-a-real-token"),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn read_scope_cannot_push() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:read"]).await;
    let vault = server.create_vault_for(user).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(json!({
            "deviceId": "11111111-1111-4111-8111-111111111111",
            "cursor": 0,
            "ops": [{"idempotencyKey": "op-1", "opType": "md_update", "payload": {}}]
        })),
        Some(&token),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn write_scope_cannot_pull() {
    // Write and read are siblings: neither implies the other.
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write"]).await;
    let vault = server.create_vault_for(user).await;

    let (status, _) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&token),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_scope_implies_read_and_write() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:admin"]).await;
    let vault = server.create_vault_for(user).await;

    let (status, _) = json_request(
        &server.router,
        "POST",
        &format!("/v1/vaults/{vault}/sync/push"),
        Some(json!({
            "deviceId": "11111111-1111-4111-8111-111111111111",
            "cursor": 0,
            "ops": [{"idempotencyKey": "op-1", "opType": "md_update", "payload": {}}]
        })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn vault_existence_is_not_probeable() {
    let server = TestServer::new().await;
    let (owner, _) = server.create_user_token(&["vault:read"]).await;
    let vault = server.create_vault_for(owner).await;
    let (_, other_token) = server.create_user_token(&["vault:read"]).await;

    // Someone else's vault and a nonexistent vault are indistinguishable.
    let (status_real, body_real) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&other_token),
    )
    .await;
    let (status_fake, body_fake) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{}/sync/pull?since=0", uuid::Uuid::new_v4()),
        None,
        Some(&other_token),
    )
    .await;

    assert_eq!(status_real, StatusCode::NOT_FOUND);
    assert_eq!(status_fake, StatusCode::NOT_FOUND);
    assert_eq!(body_real["code"], body_fake["code"]);
}

#[tokio::test]
async fn admin_creates_and_lists_vaults() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user_token(&["vault:admin"]).await;

    let (status, created) = json_request(
        &server.router,
        "POST",
        "/v1/vaults",
        Some(json!({"name": "notes"})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "notes");

    let (status, listed) =
        json_request(&server.router, "GET", "/v1/vaults", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let vaults = listed.as_array().unwrap();
    assert_eq!(vaults.len(), 1);
    assert_eq!(vaults[0]["id"], created["id"]);
}

#[tokio::test]
async fn vault_creation_requires_admin() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user_token(&["vault:write", "vault:read"]).await;

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/vaults",
        Some(json!({"name": "notes"})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn device_registration_keeps_owner() {
    let server = TestServer::new().await;
    let (_, token_a) = server.create_user_token(&["vault:write"]).await;
    let (_, token_b) = server.create_user_token(&["vault:write"]).await;

    let (status, device) = json_request(
        &server.router,
        "POST",
        "/v1/devices",
        Some(json!({"displayName": "laptop", "publicKey": "pk-a"})),
        Some(&token_a),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let device_id = device["deviceId"].as_str().unwrap().to_string();

    // Another principal cannot take over the device id.
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/devices",
        Some(json!({"deviceId": device_id, "displayName": "stolen", "publicKey": "pk-b"})),
        Some(&token_b),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let server = TestServer::new().await;
    let user = uuid::Uuid::new_v4();
    let raw_token = format!("test-token-{}", uuid::Uuid::new_v4());
    let token_hash = common::fixtures::sha256_hex(raw_token.as_bytes());

    server
        .metadata()
        .create_token(&obsync_metadata::models::TokenRow {
            token_id: uuid::Uuid::new_v4(),
            user_id: user,
            token_hash,
            scopes: r#"["vault:read"]"#.to_string(),
            expires_at: Some(time::OffsetDateTime::now_utc() - time::Duration::hours(1)),
            revoked_at: None,
            created_at: time::OffsetDateTime::now_utc() - time::Duration::days(1),
            last_used_at: None,
            description: None,
        })
        .await
        .unwrap();

    let vault = server.create_vault_for(user).await;
    let (status, _) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/sync/pull?since=0"),
        None,
        Some(&raw_token),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn key_envelope_round_trip() {
    let server = TestServer::new().await;
    let (user, token) = server.create_user_token(&["vault:write", "vault:read"]).await;
    let vault = server.create_vault_for(user).await;
    let device = uuid::Uuid::new_v4();

    for version in [1, 2] {
        let (status, _) = json_request(
            &server.router,
            "PUT",
            &format!("/v1/vaults/{vault}/keys"),
            Some(json!({
                "deviceId": device,
                "version": version,
                "encryptedVaultKey": format!("sealed-v{version}")
            })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Latest wins by default; explicit version still reachable.
    let (status, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/keys/{device}"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert_eq!(body["encryptedVaultKey"], "sealed-v2");

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/keys/{device}?version=1"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(body["encryptedVaultKey"], "sealed-v1");

    let (status, _) = json_request(
        &server.router,
        "GET",
        &format!("/v1/vaults/{vault}/keys/{}", uuid::Uuid::new_v4()),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
