//! The upload endpoint.
//!
//! Request flow: read the (limited) body, validate the query and the
//! bearer token, then hand the bytes to the pipeline and wait for
//! whichever comes first: the pipeline's response or the processing
//! deadline. A deadline does not cancel the pipeline; in-flight work runs
//! to completion and still commits, so a timed-out upload turns into a
//! cache hit on retry.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use constant_time_eq::constant_time_eq;
use serde::Deserialize;

use asset_core::{ImageProcessor, PipelineContext, ProcessResult, UploadRecord};

use super::gate::ResponseGate;
use super::{codes, error_response};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    filename: Option<String>,
}

pub async fn handle(
    State(ctx): State<PipelineContext>,
    query: Option<Query<UploadQuery>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let limit = ctx.config.upload_limit_bytes as usize;
    let bytes = match to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return if is_length_limit(&e) {
                error_response(StatusCode::PAYLOAD_TOO_LARGE, codes::PAYLOAD_TOO_LARGE)
            } else {
                tracing::debug!("failed to read request body: {e}");
                error_response(StatusCode::BAD_REQUEST, codes::BAD_REQUEST)
            };
        }
    };

    let Some(filename) = query.and_then(|q| q.0.filename) else {
        return error_response(StatusCode::BAD_REQUEST, codes::MISSING_FILENAME);
    };

    if let Some(expected) = &ctx.config.auth_header {
        if !authorized(&headers, expected) {
            return error_response(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED);
        }
    }

    tracing::info!("starting processing of image of {} bytes", bytes.len());

    // Armed before the processor so pipeline startup counts against it.
    let deadline = tokio::time::Instant::now()
        + Duration::from_secs(ctx.config.processing_timeout_secs);

    let (gate, mut receiver) = ResponseGate::new();
    let pipeline_gate = Arc::clone(&gate);
    ImageProcessor::spawn(ctx.clone(), bytes.to_vec(), &filename, move |result| {
        if !pipeline_gate.send(pipeline_response(result)) {
            tracing::debug!("pipeline finished after the response was already sent");
        }
    });

    match tokio::time::timeout_at(deadline, &mut receiver).await {
        Ok(received) => received
            .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL)),
        Err(_elapsed) => match gate.claim() {
            Some(_won) => {
                tracing::warn!("processing deadline reached");
                error_response(StatusCode::SERVICE_UNAVAILABLE, codes::PROCESSING_TIMED_OUT)
            }
            // Lost the race against the pipeline: its response is already
            // in flight on the channel.
            None => receiver
                .await
                .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL)),
        },
    }
}

fn pipeline_response(result: ProcessResult<UploadRecord>) -> Response {
    match result {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) if e.is_user_error() => {
            error_response(StatusCode::BAD_REQUEST, codes::INVALID_IMAGE)
        }
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL),
    }
}

/// Compare the Authorization header against the configured `Bearer <token>`
/// value without leaking the mismatch position through timing.
fn authorized(headers: &HeaderMap, expected: &str) -> bool {
    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(provided) => constant_time_eq(provided.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

/// Walk the error chain looking for the body length limit marker.
fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_requires_exact_header() {
        let expected = "Bearer sekrit";
        let mut headers = HeaderMap::new();
        assert!(!authorized(&headers, expected));

        headers.insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(!authorized(&headers, expected));

        headers.insert(header::AUTHORIZATION, "Bearer sekrit!".parse().unwrap());
        assert!(!authorized(&headers, expected));

        headers.insert(header::AUTHORIZATION, "Bearer sekrit".parse().unwrap());
        assert!(authorized(&headers, expected));
    }
}
