//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Vault and device administration
        .route(
            "/v1/vaults",
            post(handlers::create_vault).get(handlers::list_vaults),
        )
        .route("/v1/devices", post(handlers::register_device))
        // Sync core
        .route("/v1/vaults/{vault_id}/sync/push", post(handlers::push))
        .route("/v1/vaults/{vault_id}/sync/pull", get(handlers::pull))
        .route(
            "/v1/vaults/{vault_id}/realtime",
            get(handlers::realtime_subscribe),
        )
        // Blob control plane
        .route("/v1/vaults/{vault_id}/blobs/init", post(handlers::blob_init))
        .route(
            "/v1/vaults/{vault_id}/blobs/{blob_hash}",
            get(handlers::get_blob_manifest),
        )
        .route(
            "/v1/vaults/{vault_id}/blobs/{blob_hash}/chunks/{index}",
            put(handlers::put_chunk).get(handlers::get_chunk),
        )
        .route(
            "/v1/vaults/{vault_id}/blobs/{blob_hash}/commit",
            post(handlers::commit_blob),
        )
        // Key envelopes
        .route(
            "/v1/vaults/{vault_id}/keys",
            put(handlers::put_key_envelope),
        )
        .route(
            "/v1/vaults/{vault_id}/keys/{device_id}",
            get(handlers::get_key_envelope),
        );

    // Middleware layers apply in reverse order (outermost first):
    // TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
