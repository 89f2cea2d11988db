//! Credential scrubbing for diagnostics and client-facing messages.

use reqwest::header::HeaderMap;
use serde::Serialize;

use super::types::{ChatMessage, Credential, ModelSelector};

/// Placeholder written wherever a secret would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";

/// Maximum number of characters of the last message kept in a preview.
const PREVIEW_CHARS: usize = 80;

/// Replace every verbatim occurrence of the credential in `text`.
pub fn scrub(text: &str, credential: &Credential) -> String {
    let secret = credential.expose_secret();
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, REDACTED)
}

/// Render headers for logging, masking any value flagged as sensitive.
pub fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if value.is_sensitive() {
                REDACTED.to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}

/// Take at most `max` characters, marking truncation with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Metadata about one outbound request, safe to log.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundRecord {
    pub request_id: String,
    pub timestamp: String,
    pub provider: String,
    pub endpoint: String,
    pub model_tag: String,
    pub message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn new(
        request_id: &str,
        model: ModelSelector,
        endpoint: &str,
        headers: &HeaderMap,
        transcript: &[ChatMessage],
        credential: &Credential,
        include_preview: bool,
    ) -> Self {
        let preview = if include_preview {
            transcript
                .last()
                .map(|m| truncate_chars(&scrub(&m.content, credential), PREVIEW_CHARS))
        } else {
            None
        };

        Self {
            request_id: request_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            provider: model.provider_name().to_string(),
            endpoint: scrub(endpoint, credential),
            model_tag: super::provider::wire_model(model).to_string(),
            message_count: transcript.len(),
            preview,
            headers: redacted_headers(headers),
        }
    }

    /// Emit this record at info level.
    pub fn log(&self) {
        tracing::info!(
            request_id = %self.request_id,
            provider = %self.provider,
            endpoint = %self.endpoint,
            model = %self.model_tag,
            message_count = self.message_count,
            preview = ?self.preview,
            headers = ?self.headers,
            "Forwarding chat request"
        );
    }
}
