//! Configuration parsing and validation for chatrelay.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::relay::provider::default_endpoint;
use crate::relay::{Endpoints, ModelSelector, RetryPolicy};

/// Root configuration structure.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub endpoints: Endpoints,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:3000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Upstream call discipline.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Deadline for a single upstream attempt, in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Total attempts per chat request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff step between attempts, in milliseconds
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// TCP/TLS connect timeout, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_step_ms() -> u64 {
    1000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl RelayConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether outbound request logs include a preview of the last message
    #[serde(default = "default_true")]
    pub log_previews: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_previews: true,
        }
    }
}

/// Where a provider endpoint came from.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointSource {
    /// Built-in vendor URL
    Default,
    /// Literal string in config (no ${} references)
    Literal,
    /// Contained ${VAR} references expanded from environment
    EnvExpanded,
}

impl std::fmt::Display for EndpointSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointSource::Default => write!(f, "default"),
            EndpointSource::Literal => write!(f, "config-literal"),
            EndpointSource::EnvExpanded => write!(f, "env-expanded"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Provider endpoint overrides as written in TOML.
/// Values may contain `${VAR}` references not yet expanded.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawProvidersConfig {
    deepseek: Option<String>,
    openai: Option<String>,
    anthropic: Option<String>,
}

impl RawProvidersConfig {
    fn get(&self, model: ModelSelector) -> Option<&str> {
        match model {
            ModelSelector::DeepSeek => self.deepseek.as_deref(),
            ModelSelector::Gpt4 => self.openai.as_deref(),
            ModelSelector::Claude => self.anthropic.as_deref(),
        }
    }
}

/// Raw configuration deserialized directly from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    relay: RelayConfig,
    #[serde(default)]
    providers: RawProvidersConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// The closure-based design makes this testable without touching global env state.
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR}` from the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_sources(path).map(|(config, _)| config)
    }

    /// Like `from_file`, also reporting where each endpoint came from.
    pub fn from_file_with_sources(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, EndpointSource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str_with(&content, |name| std::env::var(name).ok())
    }

    /// Load the file if it exists. `None` means the file is absent.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_optional(path).map(Option::unwrap_or_default)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_str_with(content, |name| std::env::var(name).ok()).map(|(config, _)| config)
    }

    /// Parse configuration from a TOML string with a custom env lookup.
    pub fn parse_str_with<F>(
        content: &str,
        lookup: F,
    ) -> Result<(Self, Vec<(String, EndpointSource)>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let (config, sources) = Self::from_raw(raw, lookup)?;
        config.validate()?;
        Ok((config, sources))
    }

    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each provider:
    /// - If the URL contains `${VAR}`: expand, source = `EnvExpanded`
    /// - If the URL is a literal string: use it, source = `Literal`
    /// - If absent: built-in vendor URL, source = `Default`
    pub fn from_raw<F>(
        raw: RawConfig,
        lookup: F,
    ) -> Result<(Self, Vec<(String, EndpointSource)>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = Vec::with_capacity(ModelSelector::ALL.len());
        let mut resolve = |model: ModelSelector| -> Result<String, ConfigError> {
            let name = model.provider_name();
            let (url, source) = match raw.providers.get(model) {
                Some(value) if value.contains("${") => (
                    expand_env_vars_with(value, name, &lookup)?,
                    EndpointSource::EnvExpanded,
                ),
                Some(value) => (value.to_string(), EndpointSource::Literal),
                None => (default_endpoint(model).to_string(), EndpointSource::Default),
            };
            sources.push((name.to_string(), source));
            Ok(url)
        };

        let endpoints = Endpoints {
            deepseek: resolve(ModelSelector::DeepSeek)?,
            openai: resolve(ModelSelector::Gpt4)?,
            anthropic: resolve(ModelSelector::Claude)?,
        };

        let config = Config {
            server: raw.server,
            relay: raw.relay,
            endpoints,
            logging: raw.logging,
        };

        Ok((config, sources))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.trim().is_empty() {
            return Err(ConfigError::Validation("server.listen must not be empty".to_string()));
        }

        if !(1..=10).contains(&self.relay.max_attempts) {
            return Err(ConfigError::Validation(format!(
                "relay.max_attempts must be between 1 and 10, got {}",
                self.relay.max_attempts
            )));
        }

        if !(1..=300).contains(&self.relay.attempt_timeout_secs) {
            return Err(ConfigError::Validation(format!(
                "relay.attempt_timeout_secs must be between 1 and 300, got {}",
                self.relay.attempt_timeout_secs
            )));
        }

        if self.relay.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "relay.connect_timeout_secs must be positive".to_string(),
            ));
        }

        for model in ModelSelector::ALL {
            let url = self.endpoints.url(model);
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has invalid URL '{}'",
                    model.provider_name(),
                    url
                )));
            }
            if url.starts_with("http://") {
                tracing::warn!(
                    provider = model.provider_name(),
                    url = %url,
                    "Provider endpoint is not HTTPS - API keys will travel in clear text"
                );
            }
        }

        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let (config, sources) = Config::parse_str_with("", no_env).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:3000");
        assert_eq!(config.relay.max_attempts, 3);
        assert_eq!(config.relay.attempt_timeout_secs, 30);
        assert_eq!(config.endpoints, Endpoints::default());
        assert!(sources.iter().all(|(_, s)| *s == EndpointSource::Default));
        assert!(config.logging.log_previews);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:8080"

            [relay]
            attempt_timeout_secs = 45
            max_attempts = 2
            backoff_step_ms = 250
            connect_timeout_secs = 5

            [providers]
            deepseek = "https://proxy.internal/deepseek"

            [logging]
            level = "debug"
            log_previews = false
        "#;

        let (config, sources) = Config::parse_str_with(toml, no_env).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.endpoints.deepseek, "https://proxy.internal/deepseek");
        assert_eq!(
            config.endpoints.openai,
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(sources[0], ("deepseek".to_string(), EndpointSource::Literal));
        assert_eq!(sources[1], ("openai".to_string(), EndpointSource::Default));

        let policy = config.relay.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(45));
        assert_eq!(policy.backoff_step, Duration::from_millis(250));
        assert_eq!(config.relay.connect_timeout(), Duration::from_secs(5));
        assert!(!config.logging.log_previews);
    }

    #[test]
    fn test_env_expanded_endpoint() {
        let toml = r#"
            [providers]
            openai = "${OPENAI_BASE}/v1/chat/completions"
        "#;
        let lookup = |name: &str| match name {
            "OPENAI_BASE" => Some("https://gateway.example.com".to_string()),
            _ => None,
        };

        let (config, sources) = Config::parse_str_with(toml, lookup).unwrap();
        assert_eq!(
            config.endpoints.openai,
            "https://gateway.example.com/v1/chat/completions"
        );
        assert_eq!(sources[1].1, EndpointSource::EnvExpanded);
    }

    #[test]
    fn test_unknown_provider_key_rejected() {
        let toml = r#"
            [providers]
            llama = "https://example.com"
        "#;
        let err = Config::parse_str_with(toml, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let toml = r#"
            [providers]
            anthropic = "api.anthropic.com/v1/messages"
        "#;
        let err = Config::parse_str_with(toml, no_env).unwrap_err().to_string();
        assert!(err.contains("anthropic"), "{}", err);
    }

    #[test]
    fn test_attempt_bounds_validated() {
        let err = Config::parse_str_with("[relay]\nmax_attempts = 0\n", no_env).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        let err = Config::parse_str_with("[relay]\nattempt_timeout_secs = 0\n", no_env).unwrap_err();
        assert!(err.to_string().contains("attempt_timeout_secs"));
    }

    // ── Expansion tests (using expand_env_vars_with, no global env state) ──

    #[test]
    fn test_expand_multiple_vars() {
        let lookup = |name: &str| match name {
            "SCHEME" => Some("https".to_string()),
            "HOST" => Some("example.com".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${SCHEME}://${HOST}/v1", "test", lookup).unwrap();
        assert_eq!(result, "https://example.com/v1");
    }

    #[test]
    fn test_expand_no_vars_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("https://literal", "test", lookup).unwrap();
        assert_eq!(result, "https://literal");
    }

    #[test]
    fn test_expand_missing_var_fails() {
        let result = expand_env_vars_with("${MISSING}", "openai", no_env);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("MISSING"), "Error should name the variable");
        assert!(err.contains("openai"), "Error should name the provider");
    }

    #[test]
    fn test_expand_unclosed_brace_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let err = expand_env_vars_with("${UNCLOSED", "test", lookup)
            .unwrap_err()
            .to_string()
            .to_lowercase();
        assert!(err.contains("unclosed"), "Error should mention unclosed brace");
    }

    #[test]
    fn test_expand_empty_var_name_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let err = expand_env_vars_with("${}", "test", lookup)
            .unwrap_err()
            .to_string()
            .to_lowercase();
        assert!(err.contains("empty"), "Error should mention empty variable name");
    }
}
