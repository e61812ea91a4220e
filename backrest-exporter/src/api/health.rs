//! Health check endpoint.

use axum::{response::IntoResponse, Json};
use serde_json::json;

static START_TIME: std::sync::OnceLock<i64> = std::sync::OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(|| chrono::Utc::now().timestamp());
}

/// GET /health - Health check endpoint
pub async fn health() -> impl IntoResponse {
    let now = chrono::Utc::now().timestamp();
    let uptime = now - START_TIME.get().copied().unwrap_or(now);

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
    }))
}
