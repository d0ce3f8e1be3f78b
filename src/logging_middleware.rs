// src/logging_middleware.rs
//! Middleware for logging request and response bodies in debug mode.
//! Signatures and tokens are masked before they reach the log.

use axum::body::{to_bytes, HttpBody};
use axum::{body::Body, extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::debug;

use crate::common::helpers::redact_json;

/// Bodies larger than this are not buffered for logging
const MAX_LOGGED_BODY_BYTES: usize = 64 * 1024;

/// Render a body for the log: JSON is redacted and pretty-printed,
/// form bodies are redacted pair by pair, anything else is passed through.
fn render_body(bytes: &[u8]) -> Option<String> {
    let body_str = std::str::from_utf8(bytes).ok()?;

    if let Ok(mut json) = serde_json::from_str::<serde_json::Value>(body_str) {
        redact_json(&mut json);
        return Some(serde_json::to_string_pretty(&json).unwrap_or_else(|_| "<json>".to_string()));
    }

    if body_str.contains('=') && !body_str.contains(char::is_whitespace) {
        let mut map = serde_json::Map::new();
        for pair in body_str.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        }
        let mut json = serde_json::Value::Object(map);
        redact_json(&mut json);
        return Some(json.to_string());
    }

    Some(body_str.to_string())
}

/// Middleware to log request and response bodies in debug mode
pub async fn log_request_response(request: Request, next: Next) -> Result<Response, StatusCode> {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return Ok(next.run(request).await);
    }

    let within_cap = request
        .body()
        .size_hint()
        .upper()
        .is_some_and(|len| len <= MAX_LOGGED_BODY_BYTES as u64);
    if !within_cap {
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            "Request body too large or unsized, not logged"
        );
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();

    let bytes = to_bytes(body, MAX_LOGGED_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    if let Some(rendered) = (!bytes.is_empty()).then(|| render_body(&bytes)).flatten() {
        debug!(
            method = %parts.method,
            uri = %parts.uri,
            request_body = %rendered,
            "Request"
        );
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(rendered) = (!bytes.is_empty()).then(|| render_body(&bytes)).flatten() {
        debug!(
            status = %parts.status,
            response_body = %rendered,
            "Response"
        );
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::{middleware, routing::post, Router};
    use tower::ServiceExt;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn test_render_body_masks_form_hash() {
        let rendered = render_body(b"id=42&auth_date=1700000000&hash=0123456789abcdef").unwrap();
        assert!(rendered.contains("\"id\":\"42\""));
        assert!(rendered.contains("0123...cdef"));
        assert!(!rendered.contains("0123456789abcdef"));
    }

    #[test]
    fn test_render_body_masks_json_tokens() {
        let rendered =
            render_body(br#"{"refresh":"eyJhbGciOiJIUzI1NiJ9.payload.signature"}"#).unwrap();
        assert!(!rendered.contains("payload"));
        assert!(rendered.contains("eyJh...ture"));
    }

    #[test]
    fn test_render_body_passes_plain_text() {
        assert_eq!(render_body(b"hello world").unwrap(), "hello world");
    }

    fn echo_length_app() -> Router {
        Router::new()
            .route("/echo", post(|body: Bytes| async move { body.len().to_string() }))
            .layer(middleware::from_fn(log_request_response))
    }

    async fn post_body(app: Router, body: Vec<u8>) -> (StatusCode, String) {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from(body))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_oversized_body_passes_through_with_debug_logging() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .set_default();
        assert!(tracing::enabled!(tracing::Level::DEBUG));

        let size = MAX_LOGGED_BODY_BYTES + 1024;
        let (status, body) = post_body(echo_length_app(), vec![b'a'; size]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, size.to_string());
    }

    #[tokio::test]
    async fn test_small_body_is_logged_and_forwarded() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .set_default();

        let (status, body) = post_body(echo_length_app(), b"id=42&hash=abc".to_vec()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "14");
    }
}
