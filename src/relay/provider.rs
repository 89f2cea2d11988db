//! Per-provider wire formats.
//!
//! Each `ModelSelector` variant owns three things:
//! - the JSON payload it sends (`build_payload`)
//! - the fixed headers it sends (`build_headers`)
//! - a strict decoder for its success body (`decode_reply`)

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, PRAGMA,
};
use serde::{Deserialize, Serialize};

use super::redact::{scrub, truncate_chars};
use super::transport::UpstreamReply;
use super::types::{ChatMessage, Credential, ModelSelector, Role};
use crate::error::{Error, Result};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const CLAUDE_MODEL: &str = "claude-3-opus-20240229";
const DEEPSEEK_MODEL: &str = "deepseek-chat";
const GPT4_MODEL: &str = "gpt-4";

const CLAUDE_MAX_TOKENS: u32 = 1000;
const DEEPSEEK_MAX_TOKENS: u32 = 2000;
const GPT4_MAX_TOKENS: u32 = 1000;
const DEEPSEEK_TEMPERATURE: f64 = 0.7;

/// Longest slice of a non-JSON error body echoed back to the browser.
const ERROR_BODY_CHARS: usize = 300;

/// Upstream model tag sent in the payload.
pub fn wire_model(model: ModelSelector) -> &'static str {
    match model {
        ModelSelector::DeepSeek => DEEPSEEK_MODEL,
        ModelSelector::Gpt4 => GPT4_MODEL,
        ModelSelector::Claude => CLAUDE_MODEL,
    }
}

/// Output token bound for each provider.
pub fn max_tokens(model: ModelSelector) -> u32 {
    match model {
        ModelSelector::DeepSeek => DEEPSEEK_MAX_TOKENS,
        ModelSelector::Gpt4 => GPT4_MAX_TOKENS,
        ModelSelector::Claude => CLAUDE_MAX_TOKENS,
    }
}

/// Endpoint used when the config does not override it.
pub fn default_endpoint(model: ModelSelector) -> &'static str {
    match model {
        ModelSelector::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
        ModelSelector::Gpt4 => "https://api.openai.com/v1/chat/completions",
        ModelSelector::Claude => "https://api.anthropic.com/v1/messages",
    }
}

// --- Request payloads ---

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ClaudePayload<'a> {
    model: &'static str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct DeepSeekPayload<'a> {
    model: &'static str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiPayload<'a> {
    model: &'static str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
}

fn passthrough(transcript: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    transcript
        .iter()
        .map(|m| WireMessage {
            role: m.role,
            content: &m.content,
        })
        .collect()
}

/// DeepSeek only distinguishes the user from everyone else.
fn collapse_to_assistant(transcript: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    transcript
        .iter()
        .map(|m| WireMessage {
            role: match m.role {
                Role::User => Role::User,
                _ => Role::Assistant,
            },
            content: &m.content,
        })
        .collect()
}

/// Map a transcript to the provider's request body.
pub fn build_payload(
    model: ModelSelector,
    transcript: &[ChatMessage],
) -> Result<serde_json::Value> {
    let payload = match model {
        ModelSelector::Claude => serde_json::to_value(ClaudePayload {
            model: CLAUDE_MODEL,
            messages: passthrough(transcript),
            max_tokens: CLAUDE_MAX_TOKENS,
        }),
        ModelSelector::DeepSeek => serde_json::to_value(DeepSeekPayload {
            model: DEEPSEEK_MODEL,
            messages: collapse_to_assistant(transcript),
            max_tokens: DEEPSEEK_MAX_TOKENS,
            temperature: DEEPSEEK_TEMPERATURE,
            stream: false,
        }),
        ModelSelector::Gpt4 => serde_json::to_value(OpenAiPayload {
            model: GPT4_MODEL,
            messages: passthrough(transcript),
            max_tokens: GPT4_MAX_TOKENS,
        }),
    };

    payload.map_err(|e| Error::Internal(format!("failed to encode {} payload: {}", model, e)))
}

// --- Headers ---

fn secret_header(value: String) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&value).map_err(|_| {
        Error::InvalidRequest("API key contains characters not allowed in a header".to_string())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Fixed headers for the provider, with the credential marked sensitive.
pub fn build_headers(model: ModelSelector, credential: &Credential) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        AUTHORIZATION,
        secret_header(format!("Bearer {}", credential.expose_secret().trim()))?,
    );

    match model {
        ModelSelector::Claude => {
            headers.insert(
                HeaderName::from_static("x-api-key"),
                secret_header(credential.expose_secret().trim().to_string())?,
            );
            headers.insert(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            );
        }
        ModelSelector::DeepSeek => {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }
        ModelSelector::Gpt4 => {}
    }

    Ok(headers)
}

// --- Response decoding ---

#[derive(Deserialize)]
struct ClaudeReply {
    #[serde(default)]
    content: Vec<ClaudeBlock>,
}

#[derive(Deserialize)]
struct ClaudeBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionReply {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: Option<ChatCompletionMessage>,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

fn html_marker() -> &'static Regex {
    static HTML: OnceLock<Regex> = OnceLock::new();
    HTML.get_or_init(|| {
        Regex::new(r"(?i)^\s*(<!doctype\s+html|<html[\s>]|<head[\s>]|<body[\s>])")
            .expect("static regex is valid")
    })
}

/// Whether a reply is an HTML page rather than an API payload.
pub fn looks_like_html(reply: &UpstreamReply) -> bool {
    let declared = reply
        .content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false);
    declared || html_marker().is_match(&reply.body)
}

/// Pull a human-readable message out of a non-2xx body.
fn error_message(reply: &UpstreamReply) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&reply.body) {
        let nested = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str());
        let flat = value.get("message").and_then(|m| m.as_str());
        let plain = value.get("error").and_then(|e| e.as_str());
        if let Some(message) = nested.or(flat).or(plain) {
            return message.to_string();
        }
    }

    if looks_like_html(reply) {
        return format!(
            "API request failed: upstream returned an HTML error page (status {})",
            reply.status
        );
    }

    let trimmed = reply.body.trim();
    if trimmed.is_empty() {
        "API request failed".to_string()
    } else {
        truncate_chars(trimmed, ERROR_BODY_CHARS)
    }
}

/// Turn a raw upstream reply into the assistant's text.
///
/// Non-2xx becomes `UpstreamHttp`; unreadable 2xx bodies become
/// `UpstreamMalformed`; JSON missing the expected field becomes
/// `UpstreamUnexpectedShape`.
pub fn decode_reply(
    model: ModelSelector,
    reply: &UpstreamReply,
    credential: &Credential,
) -> Result<String> {
    if !(200..300).contains(&reply.status) {
        return Err(Error::UpstreamHttp {
            provider: model,
            status: reply.status,
            message: scrub(&error_message(reply), credential),
        });
    }

    if reply.body.trim().is_empty() {
        return Err(Error::UpstreamMalformed {
            provider: model,
            message: "empty response body".to_string(),
        });
    }

    if looks_like_html(reply) {
        return Err(Error::UpstreamMalformed {
            provider: model,
            message: "received an HTML page instead of an API response".to_string(),
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(&reply.body).map_err(|e| Error::UpstreamMalformed {
            provider: model,
            message: format!("body is not valid JSON ({})", e),
        })?;

    match model {
        ModelSelector::Claude => {
            let expected = "content[0].text";
            let parsed: ClaudeReply =
                serde_json::from_value(value).map_err(|_| Error::UpstreamUnexpectedShape {
                    provider: model,
                    expected,
                })?;
            parsed
                .content
                .into_iter()
                .next()
                .and_then(|block| block.text)
                .ok_or(Error::UpstreamUnexpectedShape {
                    provider: model,
                    expected,
                })
        }
        ModelSelector::DeepSeek | ModelSelector::Gpt4 => {
            let expected = "choices[0].message.content";
            let parsed: ChatCompletionReply =
                serde_json::from_value(value).map_err(|_| Error::UpstreamUnexpectedShape {
                    provider: model,
                    expected,
                })?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message)
                .and_then(|message| message.content)
                .ok_or(Error::UpstreamUnexpectedShape {
                    provider: model,
                    expected,
                })
        }
    }
}
