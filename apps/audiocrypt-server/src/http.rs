//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to [`ProducerTransport`] for
//! business logic and only deal with wire framing here.

use std::sync::Arc;

use audiocrypt_core::{CoreError, ErrorKind, KeyExchangeRequest, ProducerTransport};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<dyn ProducerTransport>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route(
            "/sessions/{session_id}/key-exchange",
            post(perform_key_exchange),
        )
        .route("/sessions/{session_id}", get(get_session_info))
        .route(
            "/sessions/{session_id}/slices/{slice_id}",
            get(fetch_slice),
        )
        .route("/sessions/{session_id}/tracks", post(add_track))
        .route(
            "/sessions/{session_id}/tracks/{track_id}",
            delete(remove_track),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe.
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidArgument | ErrorKind::Malformed => StatusCode::BAD_REQUEST,
        ErrorKind::Precondition => StatusCode::CONFLICT,
        ErrorKind::Handshake | ErrorKind::Integrity => StatusCode::UNAUTHORIZED,
        ErrorKind::Cancelled => StatusCode::BAD_REQUEST,
        ErrorKind::Transport | ErrorKind::Dependent | ErrorKind::Decode => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: CoreError) -> Response {
    let status = status_for(err.kind());
    (
        status,
        Json(json!({ "error": err.code(), "message": err.to_string() })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct CreateSessionQuery {
    #[serde(default)]
    metadata: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    Query(query): Query<CreateSessionQuery>,
    body: Bytes,
) -> Response {
    let metadata = query
        .metadata
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(serde_json::Value::Null);

    match state
        .transport
        .create_session(body.to_vec(), metadata)
        .await
    {
        Ok(session_id) => Json(json!({ "sessionId": session_id })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct KeyExchangeBody {
    #[serde(rename = "publicKey")]
    public_key: String,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(rename = "trackId", default)]
    track_id: Option<String>,
}

async fn perform_key_exchange(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<KeyExchangeBody>,
) -> Response {
    let request = KeyExchangeRequest {
        public_key: body.public_key,
        metadata: body.metadata,
    };

    match state
        .transport
        .perform_key_exchange(&session_id, request, body.track_id)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.transport.get_session_info(&session_id).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct TrackIdQuery {
    #[serde(rename = "trackId", default)]
    track_id: Option<String>,
}

async fn fetch_slice(
    State(state): State<AppState>,
    Path((session_id, slice_id)): Path<(String, String)>,
    Query(query): Query<TrackIdQuery>,
) -> Response {
    match state
        .transport
        .fetch_slice(&session_id, &slice_id, query.track_id)
        .await
    {
        Ok(slice) => {
            let (payload, encrypted_len) = slice.to_wire_payload();
            let mut builder = Response::builder()
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header("x-audiocrypt-sequence", slice.sequence.to_string())
                .header(
                    "x-audiocrypt-encrypted-length",
                    encrypted_len.to_string(),
                );
            if let Some(track_id) = &slice.track_id {
                builder = builder.header("x-audiocrypt-track-id", track_id.clone());
            }
            builder
                .body(axum::body::Body::from(payload))
                .expect("response with validated header values")
        }
        Err(e) => error_response(e),
    }
}

async fn add_track(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<CreateSessionQuery>,
    body: Bytes,
) -> Response {
    let metadata = query
        .metadata
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(serde_json::Value::Null);

    match state
        .transport
        .add_track(&session_id, body.to_vec(), metadata)
        .await
    {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_track(
    State(state): State<AppState>,
    Path((session_id, track_id)): Path<(String, String)>,
) -> Response {
    match state.transport.remove_track(&session_id, &track_id).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(e),
    }
}
