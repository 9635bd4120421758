//! Axum router configuration.
//!
//! ```text
//! /
//! ├── POST /                 - metadata exchange (access token -> ephemeral token)
//! ├── POST /snapshot_read    - ranged snapshot read
//! ├── POST /atomic_write     - atomic write
//! ├── /kv/*                  - datapath aliases + watch
//! └── GET  /healthz          - liveness probe
//! ```
//!
//! Datapath endpoints are POST-only; axum's method routing answers other
//! verbs with `405` and an `Allow` header. Unknown paths fall through to
//! `404`.

use axum::routing::{get, post};
use axum::Router;

use crate::server::handlers;
use crate::state::AppState;

/// Build the complete router.
pub fn build_router(state: &AppState) -> Router {
    Router::new()
        .route("/", post(handlers::metadata_exchange))
        .route("/snapshot_read", post(handlers::snapshot_read))
        .route("/atomic_write", post(handlers::atomic_write))
        .nest("/kv", kv_router())
        .route("/healthz", get(handlers::healthz))
        .with_state(state.clone())
}

/// Datapath sub-router: the `/kv` aliases plus the watch stream.
fn kv_router() -> Router<AppState> {
    Router::new()
        .route("/snapshot_read", post(handlers::snapshot_read))
        .route("/atomic_write", post(handlers::atomic_write))
        .route("/watch", post(handlers::watch))
}
