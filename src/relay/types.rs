//! Browser-facing request and response types.

use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, ErrorKind};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The closed set of models the relay can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSelector {
    DeepSeek,
    Gpt4,
    Claude,
}

impl ModelSelector {
    pub const ALL: [ModelSelector; 3] = [
        ModelSelector::DeepSeek,
        ModelSelector::Gpt4,
        ModelSelector::Claude,
    ];

    /// Canonical identifier used by the chat UI.
    pub fn id(&self) -> &'static str {
        match self {
            ModelSelector::DeepSeek => "deepseek",
            ModelSelector::Gpt4 => "gpt-4",
            ModelSelector::Claude => "claude",
        }
    }

    /// Alternative identifiers from the provider-named scheme.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            ModelSelector::DeepSeek => &[],
            ModelSelector::Gpt4 => &["openai"],
            ModelSelector::Claude => &["anthropic"],
        }
    }

    /// Vendor name, also the key under `[providers]` in the config file.
    pub fn provider_name(&self) -> &'static str {
        match self {
            ModelSelector::DeepSeek => "deepseek",
            ModelSelector::Gpt4 => "openai",
            ModelSelector::Claude => "anthropic",
        }
    }
}

impl std::fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSelector::DeepSeek => write!(f, "DeepSeek"),
            ModelSelector::Gpt4 => write!(f, "OpenAI"),
            ModelSelector::Claude => write!(f, "Anthropic"),
        }
    }
}

impl FromStr for ModelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ModelSelector::ALL
            .into_iter()
            .find(|m| m.id() == wanted || m.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| Error::UnknownModel {
                model: s.to_string(),
            })
    }
}

/// Caller-supplied provider API key. Lives for a single request.
///
/// Redacts in Debug/Display/Serialize; the raw value is only reachable
/// through `expose_secret()`.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_blank(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for Credential {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Credential::from)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Credential(SecretString::from(s))
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Credential(SecretString::from(s))
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<Credential>,
}

impl RelayRequest {
    pub fn new(
        messages: Vec<ChatMessage>,
        model: impl Into<String>,
        api_key: impl Into<Credential>,
    ) -> Self {
        Self {
            messages,
            model: model.into(),
            api_key: Some(api_key.into()),
        }
    }
}

/// Terminal result of one relay invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Success {
        response: String,
    },
    Failure {
        error: String,
        status: u16,
        kind: ErrorKind,
    },
}

impl RelayResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, RelayResponse::Success { .. })
    }

    pub fn status(&self) -> u16 {
        match self {
            RelayResponse::Success { .. } => 200,
            RelayResponse::Failure { status, .. } => *status,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RelayResponse::Success { .. } => None,
            RelayResponse::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<Error> for RelayResponse {
    fn from(err: Error) -> Self {
        RelayResponse::Failure {
            status: err.status_code(),
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

impl IntoResponse for RelayResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self)).into_response()
    }
}
