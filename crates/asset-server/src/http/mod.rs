//! HTTP surface: routing and the JSON error envelope.

pub mod gate;
pub mod upload;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;

use asset_core::PipelineContext;

/// Error codes surfaced to clients as `{"error": "<code>"}`.
pub mod codes {
    pub const PAYLOAD_TOO_LARGE: &str = "error.payload_too_large";
    pub const BAD_REQUEST: &str = "error.bad_request";
    pub const NOT_FOUND: &str = "error.not_found";
    pub const METHOD_NOT_ALLOWED: &str = "error.method_not_allowed";
    pub const MISSING_FILENAME: &str = "error.missing_filename";
    pub const UNAUTHORIZED: &str = "error.unauthorized";
    pub const INVALID_IMAGE: &str = "error.invalid_image";
    pub const PROCESSING_TIMED_OUT: &str = "error.processing_timed_out";
    pub const INTERNAL: &str = "error.internal";
}

/// Build the application router.
pub fn router(ctx: PipelineContext) -> Router {
    Router::new()
        .route(
            "/api/upload",
            post(upload::handle).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// A `{"error": code}` response with the given status.
pub fn error_response(status: StatusCode, code: &str) -> Response {
    (status, Json(serde_json::json!({ "error": code }))).into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, codes::NOT_FOUND)
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, codes::METHOD_NOT_ALLOWED)
}
