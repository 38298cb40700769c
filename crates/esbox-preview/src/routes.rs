//! Upload and serve routes.

use crate::mime::mime_for;
use crate::state::PreviewState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Cross-origin isolation headers attached to every served file.
const ISOLATION_HEADERS: &[(&str, &str)] = &[
    ("Cross-Origin-Embedder-Policy", "require-corp"),
    ("Cross-Origin-Opener-Policy", "same-origin"),
    ("Cross-Origin-Resource-Policy", "cross-origin"),
    (
        "Content-Security-Policy",
        "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:",
    ),
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "ALLOWALL"),
    ("X-XSS-Protection", "1; mode=block"),
];

#[derive(Debug, Deserialize)]
struct UploadMessage {
    #[serde(rename = "type")]
    kind: String,
    payload: UploadPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadPayload {
    project_id: String,
    files: BTreeMap<String, String>,
}

/// Build the preview router.
///
/// Host-suffix interception runs as middleware ahead of path routing, so a
/// request on a `<project>.<suffix>` host is served from the preview store
/// even when its path would also match an explicit route.
pub fn router(state: Arc<PreviewState>) -> Router {
    Router::new()
        .route("/__preview/upload", post(upload))
        .route("/__build/:project", get(serve_index))
        .route("/__build/:project/*path", get(serve_file))
        .fallback(fallback_404)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            intercept_host,
        ))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn upload(
    State(state): State<Arc<PreviewState>>,
    Json(message): Json<UploadMessage>,
) -> Response {
    if message.kind != "UPLOAD_FILES" {
        return (
            StatusCode::BAD_REQUEST,
            format!("unexpected message type: {}", message.kind),
        )
            .into_response();
    }

    let project = message.payload.project_id;
    state.upload(&project, message.payload.files);

    Json(serde_json::json!({
        "type": "UPLOAD_COMPLETE",
        "projectId": project,
    }))
    .into_response()
}

async fn serve_index(
    State(state): State<Arc<PreviewState>>,
    Path(project): Path<String>,
) -> Response {
    serve_cached(&state, &project, "index.html")
}

async fn serve_file(
    State(state): State<Arc<PreviewState>>,
    Path((project, path)): Path<(String, String)>,
) -> Response {
    let path = if path.is_empty() || path == "/" {
        "index.html".to_string()
    } else {
        path
    };
    serve_cached(&state, &project, &path)
}

/// Serve with persistent-cache fallback (`/__build/` rule).
fn serve_cached(state: &PreviewState, project: &str, path: &str) -> Response {
    match state.lookup(project, path) {
        Some(body) => file_response(path, body),
        None => not_found(project, path),
    }
}

/// Host-suffix interception: `<project>.<suffix>` requests serve the
/// in-memory entry or 404, ahead of any path-based route.
async fn intercept_host(
    State(state): State<Arc<PreviewState>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("");

    if let Some(suffix) = state.suffix() {
        if let Some(project) = host
            .strip_suffix(suffix)
            .and_then(|prefix| prefix.strip_suffix('.'))
        {
            let path = request.uri().path().trim_start_matches('/');
            let path = if path.is_empty() { "index.html" } else { path };
            debug!(project, path, "host-suffix preview request");

            return match state.memory_lookup(project, path) {
                Some(body) => file_response(path, body),
                None => not_found(project, path),
            };
        }
    }

    next.run(request).await
}

async fn fallback_404() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

fn file_response(path: &str, body: Vec<u8>) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_for(path))
        .header(header::CACHE_CONTROL, "no-store");
    for (name, value) in ISOLATION_HEADERS {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn not_found(project: &str, path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("File not found: {project}/{path}"),
    )
        .into_response()
}
