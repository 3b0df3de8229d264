//! Request id generation and per-request access logging.

use axum::{extract::Request, middleware::Next, response::Response};
use http::HeaderValue;
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Issues a UUID v4 `x-request-id` for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Wraps the request in a span carrying the request id and logs the outcome.
/// Query strings are left out: callback URLs carry provider transaction ids.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        let start = Instant::now();
        let response = next.run(request).await;
        let status = response.status();
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if status.is_server_error() {
            error!(status = status.as_u16(), elapsed_ms, "request failed");
        } else if status.is_client_error() {
            warn!(status = status.as_u16(), elapsed_ms, "request rejected");
        } else {
            info!(status = status.as_u16(), elapsed_ms, "request completed");
        }

        response
    }
    .instrument(span)
    .await
}
