//! HTTP request handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};

use super::provider;
use super::retry::format_attempts_header;
use super::server::AppState;
use super::types::{ModelSelector, RelayRequest, RelayResponse};
use crate::error::Error;

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-chatrelay-request-id";
/// Response header: wall-clock latency in milliseconds (integer).
pub const LATENCY_MS_HEADER: &str = "x-chatrelay-latency-ms";
/// Response header: failed upstream attempts, e.g. "2/openai".
pub const ATTEMPTS_HEADER: &str = "x-chatrelay-attempts";

/// Attach relay metadata headers to a response.
fn attach_relay_headers(
    response: &mut Response,
    request_id: &str,
    latency_ms: u64,
    attempts: Option<&str>,
) {
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    headers.insert(
        HeaderName::from_static(LATENCY_MS_HEADER),
        HeaderValue::from(latency_ms),
    );
    if let Some(value) = attempts.and_then(|a| HeaderValue::from_str(a).ok()) {
        headers.insert(HeaderName::from_static(ATTEMPTS_HEADER), value);
    }
}

/// Handle POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Response {
    let start = std::time::Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let (response, attempts) = match payload {
        Ok(Json(request)) => {
            tracing::info!(
                request_id = %request_id,
                model = %request.model,
                messages = request.messages.len(),
                "Received chat request"
            );
            let relayed = state.relay.execute(request, &request_id).await;
            (relayed.response, format_attempts_header(&relayed.attempts))
        }
        Err(rejection) => {
            tracing::info!(
                request_id = %request_id,
                error = %rejection.body_text(),
                "Unreadable chat request"
            );
            (
                RelayResponse::from(Error::InvalidRequest(rejection.body_text())),
                None,
            )
        }
    };

    let latency_ms = start.elapsed().as_millis() as u64;
    let mut http_response = response.into_response();
    attach_relay_headers(&mut http_response, &request_id, latency_ms, attempts.as_deref());
    http_response
}

/// Handle GET /api/models - the models the chat UI may offer
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let models: Vec<serde_json::Value> = ModelSelector::ALL
        .iter()
        .map(|model| {
            serde_json::json!({
                "id": model.id(),
                "aliases": model.aliases(),
                "provider": model.provider_name(),
                "upstream_model": provider::wire_model(*model),
                "max_tokens": provider::max_tokens(*model),
                "endpoint": state.relay.endpoints().url(*model),
            })
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": models
    }))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatrelay"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;

    #[test]
    fn test_attach_headers_with_attempts() {
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap();
        attach_relay_headers(
            &mut response,
            "550e8400-e29b-41d4-a716-446655440000",
            1523,
            Some("2/openai"),
        );
        let headers = response.headers();
        assert_eq!(
            headers.get(REQUEST_ID_HEADER).unwrap(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(headers.get(LATENCY_MS_HEADER).unwrap(), "1523");
        assert_eq!(headers.get(ATTEMPTS_HEADER).unwrap(), "2/openai");
    }

    #[test]
    fn test_attach_headers_without_attempts() {
        let mut response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::empty())
            .unwrap();
        attach_relay_headers(&mut response, "abcd1234", 50, None);
        let headers = response.headers();
        assert_eq!(headers.get(LATENCY_MS_HEADER).unwrap(), "50");
        assert!(headers.get(ATTEMPTS_HEADER).is_none());
    }
}
