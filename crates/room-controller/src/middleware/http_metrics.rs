//! Request metrics layer.
//!
//! Sits outermost on the router so the counters see every response the
//! service produces, including the ones axum synthesizes before a handler
//! runs: 404 for unknown paths, 405 for wrong methods, 400/415 for bodies
//! the extractors refuse.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Record method, normalized path, status, and latency for one request.
/// Path normalization happens in the recorder, so a burst of requests for
/// distinct room IDs still lands on one label.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}
