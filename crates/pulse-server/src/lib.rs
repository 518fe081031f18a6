//! HTTP boundary for Pulse Monitor.
//!
//! Exposes the ingestion service over an axum [`Router`]: uploads go through
//! `POST /upload`, everything else is a read-only view recomputed from the
//! store on each request.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use pulse_data::IngestService;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use pulse_core as core;
pub use pulse_data as data;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IngestService>,
}

impl AppState {
    pub fn new(service: IngestService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Build the application router. Request bodies larger than
/// `max_upload_bytes` are rejected with `413 Payload Too Large`.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/data", get(handlers::data))
        .route("/summary", get(handlers::summary))
        .route("/batches", get(handlers::batches))
        .route("/analysis", get(handlers::analysis))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
