//! The relay core: validate, normalize, forward with retries, normalize back.

use std::sync::{Arc, Mutex, PoisonError};

use super::provider;
use super::redact::{scrub, OutboundRecord};
use super::retry::{retry_with_deadline, AttemptRecord, RetryPolicy};
use super::transport::{Transport, UpstreamRequest};
use super::types::{ChatMessage, Credential, ModelSelector, RelayRequest, RelayResponse};
use crate::error::{Error, Result};

/// Upstream URL per model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub deepseek: String,
    pub openai: String,
    pub anthropic: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            deepseek: provider::default_endpoint(ModelSelector::DeepSeek).to_string(),
            openai: provider::default_endpoint(ModelSelector::Gpt4).to_string(),
            anthropic: provider::default_endpoint(ModelSelector::Claude).to_string(),
        }
    }
}

impl Endpoints {
    pub fn url(&self, model: ModelSelector) -> &str {
        match model {
            ModelSelector::DeepSeek => &self.deepseek,
            ModelSelector::Gpt4 => &self.openai,
            ModelSelector::Claude => &self.anthropic,
        }
    }
}

/// Outcome of `Relay::execute`: the response plus every failed attempt.
#[derive(Debug)]
pub struct Relayed {
    pub response: RelayResponse,
    pub model: Option<ModelSelector>,
    pub attempts: Vec<AttemptRecord>,
}

/// A validated request, ready to forward.
struct Validated {
    model: ModelSelector,
    credential: Credential,
    transcript: Vec<ChatMessage>,
}

/// Stateless relay shared by all requests.
#[derive(Clone)]
pub struct Relay {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    policy: RetryPolicy,
    log_previews: bool,
}

impl Relay {
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints, policy: RetryPolicy) -> Self {
        Self {
            transport,
            endpoints,
            policy,
            log_previews: true,
        }
    }

    /// Include a (scrubbed) preview of the last message in outbound logs.
    pub fn with_log_previews(mut self, enabled: bool) -> Self {
        self.log_previews = enabled;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Relay one chat request. Always yields a terminal response.
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        self.execute(request, "-").await.response
    }

    /// Like `handle`, also reporting the model and failed attempts.
    pub async fn execute(&self, request: RelayRequest, request_id: &str) -> Relayed {
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let validated = match validate(request) {
            Ok(validated) => validated,
            Err(err) => {
                tracing::info!(
                    request_id = %request_id,
                    kind = %err.kind(),
                    error = %err,
                    "Rejected chat request"
                );
                return Relayed {
                    response: err.into(),
                    model: None,
                    attempts: Vec::new(),
                };
            }
        };
        let model = validated.model;

        let result = self.forward(&validated, request_id, attempts.clone()).await;

        let response = match result {
            Ok(text) => RelayResponse::Success { response: text },
            Err(err) => {
                tracing::error!(
                    request_id = %request_id,
                    provider = model.provider_name(),
                    kind = %err.kind(),
                    status = err.status_code(),
                    error = %err,
                    "Chat request failed"
                );
                err.into()
            }
        };

        let attempts =
            std::mem::take(&mut *attempts.lock().unwrap_or_else(PoisonError::into_inner));
        Relayed {
            response,
            model: Some(model),
            attempts,
        }
    }

    async fn forward(
        &self,
        request: &Validated,
        request_id: &str,
        attempts: Arc<Mutex<Vec<AttemptRecord>>>,
    ) -> Result<String> {
        let model = request.model;
        let credential = &request.credential;
        let url = self.endpoints.url(model);

        let upstream = UpstreamRequest {
            url: url.to_string(),
            headers: provider::build_headers(model, credential)?,
            body: provider::build_payload(model, &request.transcript)?,
        };

        OutboundRecord::new(
            request_id,
            model,
            url,
            &upstream.headers,
            &request.transcript,
            credential,
            self.log_previews,
        )
        .log();

        let policy = self.policy;
        let on_timeout = || Error::UpstreamTimeout {
            provider: model,
            after: policy.attempt_timeout,
        };

        retry_with_deadline(policy, model.provider_name(), attempts, on_timeout, |attempt| {
            let upstream = upstream.clone();
            async move {
                tracing::debug!(request_id = %request_id, attempt, "Calling upstream");
                let reply = self
                    .transport
                    .send(upstream)
                    .await
                    .map_err(|e| Error::UpstreamNetwork {
                        provider: model,
                        message: scrub(&e.to_string(), credential),
                    })?;
                provider::decode_reply(model, &reply, credential)
            }
        })
        .await
    }
}

/// Reject requests that must not reach a provider.
fn validate(request: RelayRequest) -> Result<Validated> {
    // Upstreams see the trimmed key, so scrubbing must look for the same text
    let credential = match request.api_key {
        Some(key) if !key.is_blank() => Credential::from(key.expose_secret().trim()),
        _ => return Err(Error::MissingCredential),
    };

    let model: ModelSelector = request.model.parse()?;

    if request.messages.is_empty() {
        return Err(Error::InvalidRequest("messages must not be empty".to_string()));
    }

    Ok(Validated {
        model,
        credential,
        transcript: request.messages,
    })
}
