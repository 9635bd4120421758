//! HTTP handlers for the relay surface.
//!
//! Handlers do three things: enforce the bearer credential, hand the raw
//! body to the relay translation, and wrap the resulting bytes (or frame
//! stream, for watch) in a response. Decode failures log the error, never
//! the credential.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::bearer_token;
use crate::error::RelayError;
use crate::relay;
use crate::state::AppState;

/// Handler-level errors and their HTTP disposition.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or invalid bearer credential.
    Unauthorized,
    /// The request could not be translated.
    BadRequest(RelayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                "unauthorized",
            )
                .into_response(),
            ApiError::BadRequest(error) => {
                warn!(error = %error, "rejecting datapath request");
                (StatusCode::BAD_REQUEST, error.to_string()).into_response()
            }
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        ApiError::BadRequest(error)
    }
}

/// Require the long-lived access token (root endpoint).
fn require_access_token(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    match bearer_token(headers) {
        Some(token) if token == state.config().access_token => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Require a live ephemeral token (datapath endpoints).
fn require_ephemeral_token(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    match bearer_token(headers) {
        Some(token) if state.tokens().is_live(token) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Bootstrap document returned by the metadata exchange.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMetadata {
    version: u32,
    database_id: String,
    endpoints: Vec<EndpointInfo>,
    token: String,
    expires_at: String,
}

/// One datapath endpoint advertised to clients.
#[derive(Debug, Serialize)]
struct EndpointInfo {
    url: String,
    consistency: String,
}

/// `POST /`: trade the access token for a fresh ephemeral token.
pub async fn metadata_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DatabaseMetadata>, ApiError> {
    require_access_token(&state, &headers)?;

    let ttl = state.token_ttl();
    let token = state.tokens().issue(ttl);
    let expires_at = Utc::now()
        + ChronoDuration::milliseconds(state.config().ephemeral_token_ttl as i64);
    debug!(ttl_ms = state.config().ephemeral_token_ttl, "issued ephemeral token");

    Ok(Json(DatabaseMetadata {
        version: 1,
        database_id: state.config().database_id.to_string(),
        // The relay is its single, strongly-consistent endpoint.
        endpoints: vec![EndpointInfo {
            url: "/kv".to_string(),
            consistency: "strong".to_string(),
        }],
        token,
        expires_at: expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

/// `POST /snapshot_read` and `POST /kv/snapshot_read`.
pub async fn snapshot_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_ephemeral_token(&state, &headers)?;
    let encoded = relay::snapshot_read(state.engine(), body.to_vec()).await?;
    Ok(message_response(encoded))
}

/// `POST /atomic_write` and `POST /kv/atomic_write`.
pub async fn atomic_write(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_ephemeral_token(&state, &headers)?;
    let encoded = relay::atomic_write(state.engine(), body.to_vec()).await?;
    Ok(message_response(encoded))
}

/// `POST /kv/watch`: a lazy stream of length-prefixed update frames.
///
/// The body streams for as long as the client stays connected; dropping the
/// connection drops the stream, which cancels the engine watch at its next
/// yield point.
pub async fn watch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_ephemeral_token(&state, &headers)?;
    let frames = relay::watch(state.engine(), body.to_vec()).await?;
    let stream = frames.map(|frame| Ok::<_, std::convert::Infallible>(Bytes::from(frame)));
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// `GET /healthz`.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Wrap encoded message bytes in an octet-stream response.
fn message_response(encoded: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        encoded,
    )
        .into_response()
}
