//! Server test harness.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use obsync_core::config::{AdminConfig, AppConfig, MetadataConfig, ServerConfig, StorageConfig};
use obsync_metadata::models::{TokenRow, VaultRow};
use obsync_metadata::{MetadataStore, SqliteStore};
use obsync_server::{AppState, create_router};
use obsync_storage::{ChunkStore, FilesystemBackend};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server backed by temporary SQLite and filesystem
    /// storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with config modifications applied.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let storage_path = temp_dir.path().join("chunks");
        let chunks: Arc<dyn ChunkStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("failed to create chunk store"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("failed to create metadata store"),
        );

        let mut config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem { path: storage_path },
            metadata: MetadataConfig::Sqlite { path: db_path },
            admin: AdminConfig::for_testing(),
        };
        modifier(&mut config);

        let state = AppState::new(config, metadata, chunks);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata store.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Create an API token with the given scopes for a fresh user.
    /// Returns the user id and the raw token value.
    pub async fn create_user_token(&self, scopes: &[&str]) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let token = self.create_token_for(user_id, scopes).await;
        (user_id, token)
    }

    /// Create an API token with the given scopes for an existing user.
    pub async fn create_token_for(&self, user_id: Uuid, scopes: &[&str]) -> String {
        let raw_token = format!("test-token-{}", Uuid::new_v4());
        let token_hash = super::fixtures::sha256_hex(raw_token.as_bytes());

        self.metadata()
            .create_token(&TokenRow {
                token_id: Uuid::new_v4(),
                user_id,
                token_hash,
                scopes: serde_json::to_string(scopes).unwrap(),
                expires_at: None,
                revoked_at: None,
                created_at: OffsetDateTime::now_utc(),
                last_used_at: None,
                description: Some("test token".to_string()),
            })
            .await
            .expect("failed to create token");

        raw_token
    }

    /// Create a vault owned by the given user.
    pub async fn create_vault_for(&self, owner_id: Uuid) -> Uuid {
        let vault_id = Uuid::new_v4();
        self.metadata()
            .create_vault(&VaultRow {
                vault_id,
                owner_id,
                vault_name: "test-vault".to_string(),
                last_seq: 0,
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .expect("failed to create vault");
        vault_id
    }

    /// Serve the router on an ephemeral port and return its address.
    /// Handlers keep sharing this TestServer's state.
    pub async fn spawn(&self) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}

/// Make a JSON request against the router.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}
