//! Outbound HTTP seam.
//!
//! The relay talks to providers through the `Transport` trait so tests can
//! count and script upstream calls without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Client;

/// A fully built upstream request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// A fully buffered upstream reply.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Failure to obtain any reply (connect, TLS, reset, body read).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamReply, TransportError>;
}

/// reqwest-backed transport shared by every request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client with the given connect timeout.
    ///
    /// No overall timeout is set here; the relay applies its own deadline.
    pub fn with_connect_timeout(connect_timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamReply, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| TransportError(describe(&e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| TransportError(describe(&e)))?;

        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

/// Describe a reqwest error without its URL.
fn describe(err: &reqwest::Error) -> String {
    let what = if err.is_connect() {
        "connection failed"
    } else if err.is_timeout() {
        "transport timed out"
    } else if err.is_body() || err.is_decode() {
        "failed to read response body"
    } else if err.is_request() {
        "request could not be sent"
    } else {
        "request failed"
    };

    match std::error::Error::source(err) {
        Some(source) => format!("{}: {}", what, source),
        None => what.to_string(),
    }
}
