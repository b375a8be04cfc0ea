use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub static X_REQUEST_ID: &str = "x-request-id";

/// Per-request id, also used as the completion id suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Mints a fresh request id, wraps the request in an `http_request` span and
/// returns the id in the `x-request-id` header.
///
/// The id is unique per call. A client-sent `x-request-id` is only recorded
/// as `client_request_id` for correlation.
///
/// Bodies are never buffered here so SSE responses stream through untouched.
pub async fn trace_middleware(mut req: Request, next: Next) -> Response {
    let start_time = Instant::now();

    let request_id = Uuid::new_v4().simple().to_string();
    let client_request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let span = info_span!(
        "http_request",
        request_id = %request_id,
        client_request_id = client_request_id.as_deref(),
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        info!("→ request started");
        req.extensions_mut().insert(RequestId(request_id.clone()));

        let mut response = next.run(req).await;

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response headers sent"
        );
        response
    }
    .instrument(span)
    .await
}

// ── Tests ──────────────────────────────────────────────────────────────────────
