//! HTTP API module for the exporter.

pub mod health;
pub mod metrics;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::registry::PrometheusSink;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<PrometheusSink>,
}

/// Create the API router serving metrics on `metrics_path`
pub fn create_router(state: AppState, metrics_path: &str) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(metrics_path, get(metrics::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
