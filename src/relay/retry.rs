//! Retry logic for upstream calls.
//!
//! - Up to `max_attempts` attempts, each bounded by `attempt_timeout`
//! - Linear backoff between attempts: `backoff_step * n` before attempt `n + 1`
//! - One deadline of `max_attempts * attempt_timeout` over the whole sequence
//! - Attempt tracking via shared `Arc<Mutex<Vec<AttemptRecord>>>` that survives
//!   deadline cancellation
//! - Header formatting for `x-chatrelay-attempts`

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Timing and attempt bounds for one relay invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `failed_attempts` failures.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        self.backoff_step * failed_attempts
    }

    /// Upper bound on total time spent, delays included.
    pub fn deadline(&self) -> Duration {
        self.attempt_timeout * self.max_attempts.max(1)
    }
}

/// Record of a single failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub provider_name: String,
    pub kind: &'static str,
    pub status_code: u16,
    /// Delay that preceded this attempt.
    pub backoff: Duration,
}

/// Errors the retry loop can classify.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
    fn status_code(&self) -> u16;
    fn kind_str(&self) -> &'static str;
}

impl Retryable for crate::error::Error {
    fn is_retryable(&self) -> bool {
        crate::error::Error::is_retryable(self)
    }

    fn status_code(&self) -> u16 {
        crate::error::Error::status_code(self)
    }

    fn kind_str(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Format attempt records into the `x-chatrelay-attempts` header value.
///
/// Format: `"2/openai"`. Returns `None` if no attempt failed.
pub fn format_attempts_header(attempts: &[AttemptRecord]) -> Option<String> {
    if attempts.is_empty() {
        return None;
    }
    // Preserve order of first appearance
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for attempt in attempts {
        if let Some(entry) = counts
            .iter_mut()
            .find(|(name, _)| *name == attempt.provider_name)
        {
            entry.1 += 1;
        } else {
            counts.push((&attempt.provider_name, 1));
        }
    }
    Some(
        counts
            .iter()
            .map(|(name, count)| format!("{}/{}", count, name))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn record(attempts: &Mutex<Vec<AttemptRecord>>, entry: AttemptRecord) {
    attempts
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(entry);
}

/// Run `send` until it succeeds, fails permanently, or the policy is exhausted.
///
/// Algorithm:
/// 1. Attempt up to `max_attempts` times, each under `attempt_timeout`
/// 2. On success: return immediately
/// 3. On error: record it, return immediately if not retryable
/// 4. Sleep `backoff(n)` before the next attempt
/// 5. After the last attempt: return its error
///
/// The entire loop runs under `policy.deadline()`. `on_timeout` builds the
/// error for an expired attempt or an expired overall deadline. Dropping the
/// in-flight future on expiry cancels the upstream call.
pub async fn retry_with_deadline<T, E, F, Fut, G>(
    policy: RetryPolicy,
    provider_name: &str,
    attempts: Arc<Mutex<Vec<AttemptRecord>>>,
    on_timeout: G,
    send: F,
) -> Result<T, E>
where
    E: Retryable,
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    G: Fn() -> E,
{
    let max_attempts = policy.max_attempts.max(1);

    let sequence = async {
        let mut backoff = Duration::ZERO;
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(policy.attempt_timeout, send(attempt)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(on_timeout()),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            record(
                &attempts,
                AttemptRecord {
                    attempt,
                    provider_name: provider_name.to_string(),
                    kind: err.kind_str(),
                    status_code: err.status_code(),
                    backoff,
                },
            );

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            backoff = policy.backoff(attempt);
            tracing::warn!(
                provider = %provider_name,
                attempt,
                kind = err.kind_str(),
                backoff_ms = backoff.as_millis() as u64,
                "Upstream attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    };

    match tokio::time::timeout(policy.deadline(), sequence).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(
                provider = %provider_name,
                deadline_ms = policy.deadline().as_millis() as u64,
                "Request deadline expired"
            );
            Err(on_timeout())
        }
    }
}
