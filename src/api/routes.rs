//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::state::AppState;
use crate::engine::{generator, receiver};

/// Routes mounted under `/network-test`.
pub fn network_test_routes() -> Router<AppState> {
    Router::new()
        .route("/download", get(generator::download_handler))
        // The receiver enforces its own limit while draining.
        .route(
            "/upload",
            post(receiver::upload_handler).layer(DefaultBodyLimit::disable()),
        )
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
