//! End-to-end tests for the HTTP surface.
//!
//! Drives the axum router with `tower::ServiceExt::oneshot` while the
//! upstream providers are `wiremock` servers, so the real reqwest transport,
//! headers and payloads are exercised.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::Request;
use tower::ServiceExt;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatrelay::relay::{create_router, AppState, Endpoints, HttpTransport, Relay, RetryPolicy};

const API_KEY: &str = "sk-http-test-secret";

/// Relay pointed at a mock server, with fast retries.
fn setup_app(server: &MockServer, attempt_timeout: Duration) -> axum::Router {
    let endpoints = Endpoints {
        deepseek: format!("{}/deepseek/v1/chat/completions", server.uri()),
        openai: format!("{}/openai/v1/chat/completions", server.uri()),
        anthropic: format!("{}/anthropic/v1/messages", server.uri()),
    };
    let policy = RetryPolicy {
        max_attempts: 3,
        attempt_timeout,
        backoff_step: Duration::from_millis(10),
    };
    let transport = HttpTransport::with_connect_timeout(Duration::from_secs(2)).unwrap();
    let relay = Relay::new(Arc::new(transport), endpoints, policy);
    create_router(AppState::new(relay))
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Parse the response body as JSON and return (status_code, headers, json_value).
async fn parse_body(
    response: axum::response::Response,
) -> (http::StatusCode, http::HeaderMap, serde_json::Value) {
    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap_or_default();
    (status, headers, json)
}

#[tokio::test]
async fn claude_round_trip_sends_exact_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/anthropic/v1/messages"))
        .and(header("x-api-key", API_KEY))
        .and(header("anthropic-version", "2023-06-01"))
        .and(header("authorization", format!("Bearer {}", API_KEY).as_str()))
        .and(body_json(serde_json::json!({
            "model": "claude-3-opus-20240229",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1000
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "content": [{"type": "text", "text": "Hello from Claude"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(&server, Duration::from_secs(5));
    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}],
            "model": "claude",
            "apiKey": API_KEY
        })))
        .await
        .unwrap();
    let (status, headers, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json, serde_json::json!({"response": "Hello from Claude"}));
    assert!(headers.get("x-chatrelay-request-id").is_some());
    assert!(headers.get("x-chatrelay-latency-ms").is_some());
    assert!(headers.get("x-chatrelay-attempts").is_none());
}

#[tokio::test]
async fn deepseek_retries_transient_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/deepseek/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/deepseek/v1/chat/completions"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "third time lucky"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(&server, Duration::from_secs(5));
    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hello"}],
            "model": "deepseek",
            "apiKey": API_KEY
        })))
        .await
        .unwrap();
    let (status, headers, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["response"], "third time lucky");
    assert_eq!(headers.get("x-chatrelay-attempts").unwrap(), "2/deepseek");
}

#[tokio::test]
async fn html_page_with_200_is_reported_as_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<!DOCTYPE html><html><body>Cloudflare</body></html>", "text/html"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let app = setup_app(&server, Duration::from_secs(5));
    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hello"}],
            "model": "gpt-4",
            "apiKey": API_KEY
        })))
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::BAD_GATEWAY);
    assert_eq!(json["kind"], "upstream_malformed_response");
    assert!(json.get("response").is_none());
}

#[tokio::test]
async fn provider_auth_error_is_relayed_with_its_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {
                "message": format!("Incorrect API key provided: {}", API_KEY),
                "type": "invalid_request_error"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(&server, Duration::from_secs(5));
    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hello"}],
            "model": "openai",
            "apiKey": API_KEY
        })))
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::UNAUTHORIZED);
    assert_eq!(json["kind"], "upstream_http_error");
    assert_eq!(json["error"], "Incorrect API key provided: [REDACTED]");
}

#[tokio::test]
async fn slow_provider_times_out_with_504() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/anthropic/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"content": [{"text": "too late"}]}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let app = setup_app(&server, Duration::from_millis(200));
    let start = std::time::Instant::now();
    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hello"}],
            "model": "claude",
            "apiKey": API_KEY
        })))
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["kind"], "upstream_timeout");
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn validation_errors_never_reach_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = setup_app(&server, Duration::from_secs(5));

    let response = app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hello"}],
            "model": "deepseek"
        })))
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "API key is required");

    let response = app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hello"}],
            "model": "llama",
            "apiKey": API_KEY
        })))
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "unknown_model");
}

#[tokio::test]
async fn body_without_key_or_model_reports_missing_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = setup_app(&server, Duration::from_secs(5));
    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "missing_credential");
    assert_eq!(json["error"], "API key is required");
}

#[tokio::test]
async fn unreadable_body_is_a_400_json_error() {
    let server = MockServer::start().await;
    let app = setup_app(&server, Duration::from_secs(5));

    let request = Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let (status, headers, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "invalid_request");
    assert!(headers.get("x-chatrelay-request-id").is_some());
}

#[tokio::test]
async fn models_and_health_endpoints() {
    let server = MockServer::start().await;
    let app = setup_app(&server, Duration::from_secs(5));

    let response = app
        .clone()
        .oneshot(Request::get("/api/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::OK);
    let ids: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["deepseek", "gpt-4", "claude"]);
    assert_eq!(json["data"][2]["aliases"][0], "anthropic");

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let (status, _headers, json) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["status"], "ok");
}
