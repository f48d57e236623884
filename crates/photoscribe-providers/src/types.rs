//! Provider types and the vision capability trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use photoscribe_types::{ProviderOptions, TokenUsage};

/// Failure classification for a describe call. Drives the engine's retry
/// decision: transient kinds consume retry budget, permanent kinds stop
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Wall-clock deadline exceeded.
    Timeout,
    /// Provider signalled rate limiting (HTTP 429).
    RateLimited,
    /// Transient server-side error (HTTP 5xx).
    ServerError,
    /// Connection-level failure (DNS, refused, reset).
    Network,
    /// Authentication or authorization failure.
    Auth,
    /// The request itself was rejected as malformed.
    InvalidRequest,
    /// The requested model does not exist on this provider.
    ModelNotFound,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::RateLimited
                | FailureKind::ServerError
                | FailureKind::Network
        )
    }
}

/// A classified describe failure, carried as a value rather than thrown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl DescribeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DescribeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of one describe call.
///
/// An empty `text` with no failure is a valid outcome: the provider
/// answered successfully but produced no content. That case is recorded as
/// a completed attempt, never retried, and counted separately in summaries.
#[derive(Debug, Clone, Default)]
pub struct DescribeResult {
    pub text: String,
    pub failure: Option<DescribeFailure>,
    pub token_usage: Option<TokenUsage>,
}

impl DescribeResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            failure: None,
            token_usage: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            failure: Some(DescribeFailure::new(kind, message)),
            token_usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.token_usage = usage;
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// One image description request.
#[derive(Debug, Clone)]
pub struct DescribeRequest {
    /// Image data (raw bytes).
    pub image: Vec<u8>,
    /// MIME type (e.g. "image/jpeg").
    pub mime_type: String,
    /// Model identifier.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Recognized call options; unsupported knobs are ignored per provider.
    pub options: ProviderOptions,
}

/// Capability contract implemented once per vision backend.
///
/// `describe` must never return `Err`-style escalation for predictable
/// failure modes; those are classified into `DescribeResult::failure`.
/// Retry logic lives in the engine so backoff policy is uniform across
/// providers.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Provider identifier used in configuration and description records.
    fn id(&self) -> &str;

    /// Cheap local availability check (API key present, base URL
    /// configured). Must return fast; no network round-trip guaranteed to
    /// succeed.
    fn is_available(&self) -> bool;

    /// List installed/offered model identifiers. An empty list is valid and
    /// means the provider is configured but has no models.
    async fn list_models(&self) -> anyhow::Result<Vec<String>>;

    /// Describe an image.
    async fn describe(&self, req: DescribeRequest) -> DescribeResult;
}

/// Map an HTTP status to a failure classification.
pub(crate) fn classify_http_status(status: u16) -> FailureKind {
    match status {
        401 | 403 => FailureKind::Auth,
        404 => FailureKind::ModelNotFound,
        408 => FailureKind::Timeout,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::ServerError,
        _ => FailureKind::InvalidRequest,
    }
}

/// Map a transport-level reqwest error to a failure classification.
pub(crate) fn classify_transport_error(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network
    }
}

/// Pull the `temperature`/`max_tokens` knobs a provider recognizes out of
/// the options, ignoring everything it does not.
pub(crate) fn recognized_knobs(options: &ProviderOptions) -> (Option<f64>, Option<u32>) {
    (options.temperature, options.max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_retryability() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(FailureKind::ServerError.is_retryable());
        assert!(FailureKind::Network.is_retryable());
        assert!(!FailureKind::Auth.is_retryable());
        assert!(!FailureKind::InvalidRequest.is_retryable());
        assert!(!FailureKind::ModelNotFound.is_retryable());
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(401), FailureKind::Auth);
        assert_eq!(classify_http_status(404), FailureKind::ModelNotFound);
        assert_eq!(classify_http_status(429), FailureKind::RateLimited);
        assert_eq!(classify_http_status(500), FailureKind::ServerError);
        assert_eq!(classify_http_status(503), FailureKind::ServerError);
        assert_eq!(classify_http_status(400), FailureKind::InvalidRequest);
    }

    #[test]
    fn test_empty_success_is_not_failure() {
        let result = DescribeResult::success("");
        assert!(result.is_success());
        assert!(result.text.is_empty());
        assert!(result.failure.is_none());
    }
}
