//! API layer -- axum routes, handlers, and error responses.

mod routes;
pub mod state;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use self::state::AppState;
use crate::error::ProbeError;

/// Build the application router with all test endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .nest("/network-test", routes::network_test_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// A request-level [`ProbeError`] paired with the status it is reported as.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: ProbeError,
}

impl ApiError {
    /// Report `error` with an explicit status instead of its default one.
    pub fn new(status: StatusCode, error: ProbeError) -> Self {
        Self { status, error }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ProbeError> for ApiError {
    fn from(error: ProbeError) -> Self {
        Self {
            status: error.status(),
            error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error.to_string(),
            "kind": self.error.code(),
        }));
        (self.status, body).into_response()
    }
}
