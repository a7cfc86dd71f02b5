use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_BODY_LOG_SIZE: usize = 64 * 1024;

/// Tags every request with an id and logs it with the response status and
/// latency. With `LOG_REQUEST_BODY=true` JSON bodies are logged with
/// sensitive fields masked; the body itself is passed on byte for byte, since
/// webhook signatures are computed over it.
pub async fn request_logger_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let log_body = std::env::var("LOG_REQUEST_BODY")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    if log_body {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BODY_LOG_SIZE).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(request_id = %request_id, method = %method, uri = %uri, error = %e, "Failed to read request body");
                return Response::builder()
                    .status(axum::http::StatusCode::PAYLOAD_TOO_LARGE)
                    .body(Body::from("Request body too large"))
                    .unwrap_or_default();
            }
        };

        let sanitized_body = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(json) => {
                let sanitized = crate::utils::sanitize::sanitize_json(&json);
                serde_json::to_string(&sanitized).unwrap_or_else(|_| "[invalid json]".to_string())
            }
            Err(_) => format!("[non-json, {} bytes]", bytes.len()),
        };

        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            body_size = bytes.len(),
            body = %sanitized_body,
            "Incoming request"
        );

        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::info!(request_id = %request_id, method = %method, uri = %uri, "Incoming request");
    }

    let response = next.run(req).await;

    let status = response.status();
    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Outgoing response"
    );

    let (mut parts, body) = response.into_parts();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, value);
    }

    Response::from_parts(parts, body)
}
