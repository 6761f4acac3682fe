//! LLM error types with retry classification.
//!
//! Ollama and Azure OpenAI fail in the same ways from our point of view: the
//! daemon is busy or down (retry), the request is wrong (give up), or the
//! model cannot do what we asked (tool calling on a model without tool
//! support).

use std::future::Future;
use std::time::{Duration, Instant};

/// Longest single wait between attempts, whatever the server asks for.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Error from LLM API calls.
#[derive(Debug)]
pub struct LlmError {
    /// The kind of error
    pub kind: LlmErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn with_kind(kind: LlmErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
        }
    }

    /// Create a rate limit error.
    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::with_kind(LlmErrorKind::RateLimited, Some(429), message)
        }
    }

    /// Create a server error.
    pub fn server_error(status_code: u16, message: String) -> Self {
        Self::with_kind(LlmErrorKind::ServerError, Some(status_code), message)
    }

    /// Create a client error (bad request, auth, unknown model).
    pub fn client_error(status_code: u16, message: String) -> Self {
        Self::with_kind(LlmErrorKind::ClientError, Some(status_code), message)
    }

    /// Create a network error.
    pub fn network_error(message: String) -> Self {
        Self::with_kind(LlmErrorKind::NetworkError, None, message)
    }

    /// Create a parse error.
    pub fn parse_error(message: String) -> Self {
        Self::with_kind(LlmErrorKind::ParseError, None, message)
    }

    /// Create an incompatible model error.
    pub fn incompatible_model(message: String) -> Self {
        Self::with_kind(LlmErrorKind::IncompatibleModel, None, message)
    }

    /// Build the error for a non-success HTTP reply.
    ///
    /// Ollama answers 400 with "does not support tools" when a model lacks a
    /// tool-calling template; that is reported as an incompatible model.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        if status == 400 && body.contains("does not support tools") {
            return Self {
                status_code: Some(status),
                ..Self::incompatible_model(body.to_string())
            };
        }
        match classify_http_status(status) {
            LlmErrorKind::RateLimited => Self::rate_limited(body.to_string(), retry_after),
            LlmErrorKind::ClientError => Self::client_error(status, body.to_string()),
            _ => Self::server_error(status, body.to_string()),
        }
    }

    /// Map a transport failure from reqwest.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network_error(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            Self::network_error(format!("Connection failed: {}", e))
        } else {
            Self::network_error(format!("Request failed: {}", e))
        }
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Get the suggested delay before retry.
    ///
    /// Returns the `retry_after` if set, otherwise an exponential backoff
    /// based on the error kind. Either way capped at 60 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after.min(MAX_RETRY_DELAY);
        }

        let base_delay = match self.kind {
            LlmErrorKind::RateLimited => Duration::from_secs(5),
            LlmErrorKind::ServerError => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        };

        let multiplier = 2u64.saturating_pow(attempt);
        let delay_secs = base_delay.as_secs().saturating_mul(multiplier);

        // Deterministic jitter, up to 25% of the delay
        let jitter_range = delay_secs / 4;
        let jitter = if jitter_range > 0 {
            (attempt as u64 * 7) % jitter_range
        } else {
            0
        };

        Duration::from_secs(delay_secs.saturating_add(jitter)).min(MAX_RETRY_DELAY)
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Rate limited (429) - transient, should retry with backoff
    RateLimited,
    /// Server error (500, 502, 503, 504) - transient, should retry
    ServerError,
    /// Client error (400, 401, 403, 404) - permanent
    ClientError,
    /// Network error (daemon not running, timeout) - transient
    NetworkError,
    /// Response parsing error - permanent
    ParseError,
    /// Model cannot serve the request (e.g. no tool support)
    IncompatibleModel,
}

impl LlmErrorKind {
    /// Check if this error kind is transient (should retry with same model).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmErrorKind::RateLimited => write!(f, "Rate limited"),
            LlmErrorKind::ServerError => write!(f, "Server error"),
            LlmErrorKind::ClientError => write!(f, "Client error"),
            LlmErrorKind::NetworkError => write!(f, "Network error"),
            LlmErrorKind::ParseError => write!(f, "Parse error"),
            LlmErrorKind::IncompatibleModel => write!(f, "Incompatible model"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
    /// Whether to retry on rate limit errors
    pub retry_rate_limits: bool,
    /// Whether to retry on server errors
    pub retry_server_errors: bool,
    /// Whether to retry on network errors
    pub retry_network_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
            retry_rate_limits: true,
            retry_server_errors: true,
            retry_network_errors: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all (tests, health checks).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Check if the given error should be retried based on this config.
    pub fn should_retry(&self, error: &LlmError) -> bool {
        match error.kind {
            LlmErrorKind::RateLimited => self.retry_rate_limits,
            LlmErrorKind::ServerError => self.retry_server_errors,
            LlmErrorKind::NetworkError => self.retry_network_errors,
            LlmErrorKind::ClientError
            | LlmErrorKind::ParseError
            | LlmErrorKind::IncompatibleModel => false,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            "{} succeeded after {} retries (total time: {:?})",
                            label,
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let remaining = self.max_retry_duration.saturating_sub(start.elapsed());
                    let delay = error.suggested_delay(attempt).min(remaining);
                    let should_retry = self.should_retry(&error)
                        && attempt < self.max_retries
                        && !delay.is_zero();

                    if !should_retry {
                        if attempt > 0 {
                            tracing::error!(
                                "{} failed after {} retries (total time: {:?}): {}",
                                label,
                                attempt,
                                start.elapsed(),
                                error
                            );
                        } else {
                            tracing::error!("{} failed (non-retryable): {}", label, error);
                        }
                        return Err(anyhow::Error::new(error));
                    }

                    tracing::warn!(
                        "{} attempt {} failed with {}, retrying in {:?}: {}",
                        label,
                        attempt + 1,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500 | 502 | 503 | 504 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_transient_classification() {
        assert!(LlmErrorKind::RateLimited.is_transient());
        assert!(LlmErrorKind::ServerError.is_transient());
        assert!(LlmErrorKind::NetworkError.is_transient());
        assert!(!LlmErrorKind::ClientError.is_transient());
        assert!(!LlmErrorKind::ParseError.is_transient());
        assert!(!LlmErrorKind::IncompatibleModel.is_transient());
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(400), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(404), LlmErrorKind::ClientError);
    }

    #[test]
    fn test_ollama_tool_support_error() {
        let err = LlmError::from_status(
            400,
            r#"{"error":"registry.ollama.ai/library/gemma:2b does not support tools"}"#,
            None,
        );
        assert_eq!(err.kind, LlmErrorKind::IncompatibleModel);
        assert_eq!(err.status_code, Some(400));

        let plain = LlmError::from_status(400, "bad request", None);
        assert_eq!(plain.kind, LlmErrorKind::ClientError);
    }

    #[test]
    fn test_exponential_backoff() {
        let error = LlmError::rate_limited("test".to_string(), None);

        let delay_0 = error.suggested_delay(0);
        let delay_1 = error.suggested_delay(1);
        let delay_2 = error.suggested_delay(2);
        assert!(delay_1 > delay_0);
        assert!(delay_2 > delay_1);
        assert!(error.suggested_delay(10).as_secs() <= 60);
    }

    #[test]
    fn test_retry_after_respected() {
        let error = LlmError::rate_limited("test".to_string(), Some(Duration::from_secs(30)));
        assert_eq!(error.suggested_delay(0), Duration::from_secs(30));
        assert_eq!(error.suggested_delay(5), Duration::from_secs(30));
    }

    #[test]
    fn test_long_retry_after_is_capped() {
        let error = LlmError::rate_limited("test".to_string(), Some(Duration::from_secs(300)));
        assert_eq!(error.suggested_delay(0), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_run_does_not_retry_client_errors() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = RetryConfig::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::client_error(401, "unauthorized".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = RetryConfig::default()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(LlmError::server_error(503, "loading model".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
