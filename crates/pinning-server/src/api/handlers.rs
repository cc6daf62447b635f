//! Manifest and ops handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use pinning_core::signed_keys;
use prometheus::{Encoder, TextEncoder};
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::storage::{FileQuery, ProbeReport};

/// Serve the signed pin manifest for one file
///
/// GET /api/v1/{file}
///
/// Structured backends hand back records which are signed on the way out;
/// the filesystem backend already stores complete signed manifests and its
/// bytes are returned verbatim.
pub async fn manifest(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    if file.is_empty() {
        return Err(ApiError::FileRequired);
    }

    debug!(file = %file, "manifest request");

    let query = state
        .store
        .get_by_file(&file)
        .await
        .map_err(|err| ApiError::from_storage(err, &file))?;

    let data = match query {
        FileQuery::Raw(bytes) => Some(bytes),
        FileQuery::Records(records) if !records.is_empty() => {
            signed_keys(&file, records, &state.signer)?
        }
        _ => None,
    };

    match data {
        Some(bytes) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response()),
        None => Err(ApiError::FileNotFound(file)),
    }
}

/// Fallback for requests that never supplied a file name
///
/// GET /api/v1 and GET /api/v1/
pub async fn missing_file() -> ApiError {
    ApiError::FileRequired
}

/// Prometheus text exposition
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let families = state.registry.gather();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Minimal landing page for the ops listener
///
/// GET /
pub async fn root() -> Html<&'static str> {
    Html(
        "<html>\
         <head><title>Metrics</title></head>\
         <body><h1>Metrics</h1><p><a href='/metrics'>Metrics</a></p></body>\
         </html>",
    )
}

/// GET /health/liveness
pub async fn liveness(State(state): State<Arc<AppState>>) -> Response {
    probe_response(state.store.probe_liveness().await)
}

/// GET /health/readiness
pub async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    probe_response(state.store.probe_readiness().await)
}

/// GET /health/startup
pub async fn startup(State(state): State<Arc<AppState>>) -> Response {
    probe_response(state.store.probe_startup().await)
}

fn probe_response(report: ProbeReport) -> Response {
    if report.healthy() {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, report.errors.join("\n")).into_response()
    }
}
