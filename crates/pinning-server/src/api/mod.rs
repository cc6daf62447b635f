//! HTTP surface of the pinning service
//!
//! Two routers with independent listeners:
//! - the public API router serving `GET /api/v1/{file}` manifests
//! - the ops router on a loopback port serving metrics, a landing page and
//!   the storage-backed health probes

pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use pinning_core::Signer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::storage::PinStore;

/// Shared state for both routers
pub struct AppState {
    pub store: Arc<dyn PinStore>,
    pub signer: Arc<Signer>,
    pub registry: prometheus::Registry,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .finish()
    }
}

/// Create the public API router.
///
/// `write_timeout` bounds how long a manifest request may take end to end.
pub fn create_router(state: Arc<AppState>, write_timeout: Duration) -> Router {
    Router::new()
        .route("/api/v1/{file}", get(handlers::manifest))
        // a bare prefix carries no file name to resolve
        .route("/api/v1", get(handlers::missing_file))
        .route("/api/v1/", get(handlers::missing_file))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(write_timeout))
        .with_state(state)
}

/// Create the internal ops router (metrics + health probes).
pub fn create_ops_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics))
        .route("/", get(handlers::root))
        .route("/health/liveness", get(handlers::liveness))
        .route("/health/readiness", get(handlers::readiness))
        .route("/health/startup", get(handlers::startup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
