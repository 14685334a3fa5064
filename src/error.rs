//! Huginn error types

use std::fmt;
use std::time::Duration;

use crate::types::ProviderKind;

/// Closed set of failure kinds a provider adapter may report.
///
/// Every wire-level failure (HTTP status, malformed body, blocked prompt,
/// transport error) is mapped onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    RateLimited,
    AuthFailed,
    Timeout,
    InvalidRequest,
    ProviderUnavailable,
    MalformedResponse,
}

impl ProviderErrorKind {
    /// Kinds retried by the default [`RetryPolicy`](crate::RetryPolicy).
    pub const DEFAULT_RETRYABLE: [ProviderErrorKind; 3] = [
        ProviderErrorKind::RateLimited,
        ProviderErrorKind::Timeout,
        ProviderErrorKind::ProviderUnavailable,
    ];

    /// Whether a later attempt may succeed without any change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        Self::DEFAULT_RETRYABLE.contains(self)
    }

    /// Whether the backend itself (rather than the request) is the problem.
    ///
    /// These kinds allow the orchestrator to try the fallback provider.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::ProviderUnavailable | ProviderErrorKind::AuthFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::AuthFailed => "auth_failed",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::InvalidRequest => "invalid_request",
            ProviderErrorKind::ProviderUnavailable => "provider_unavailable",
            ProviderErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by one provider, with an opaque diagnostic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{provider} {kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: ProviderKind,
    pub message: String,
    /// Server-provided wait hint (`Retry-After`), if any.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Huginn error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HuginnError {
    /// Terminal provider failure (non-retryable kind).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ProviderError },

    /// Primary and fallback both failed; holds each provider's failure in order.
    #[error("all providers unavailable: {}", join_failures(.failures))]
    AllProvidersUnavailable { failures: Vec<HuginnError> },

    #[error("model '{model}' is not supported by {provider}")]
    UnsupportedModel { provider: ProviderKind, model: String },

    #[error("attachment of {size} bytes exceeds the {limit} byte limit of {provider}")]
    RequestTooLarge {
        provider: ProviderKind,
        size: usize,
        limit: usize,
    },

    #[error("provider not registered: {0}")]
    UnknownProvider(ProviderKind),

    #[error("no provider configured")]
    NoProvider,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl HuginnError {
    /// The provider failure kind behind this error, if there is one.
    pub fn kind(&self) -> Option<ProviderErrorKind> {
        match self {
            HuginnError::Provider(e) => Some(e.kind),
            HuginnError::RetriesExhausted { last, .. } => Some(last.kind),
            HuginnError::AllProvidersUnavailable { failures } => {
                failures.last().and_then(HuginnError::kind)
            }
            _ => None,
        }
    }

    /// The provider that produced this error, if any.
    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            HuginnError::Provider(e) => Some(e.provider),
            HuginnError::RetriesExhausted { last, .. } => Some(last.provider),
            HuginnError::UnsupportedModel { provider, .. }
            | HuginnError::RequestTooLarge { provider, .. } => Some(*provider),
            HuginnError::UnknownProvider(provider) => Some(*provider),
            HuginnError::AllProvidersUnavailable { failures } => {
                failures.first().and_then(HuginnError::provider)
            }
            _ => None,
        }
    }

    /// Whether showing the user a "try again" affordance makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            HuginnError::Provider(e) => e.kind.is_retryable(),
            HuginnError::RetriesExhausted { last, .. } => last.kind.is_retryable(),
            HuginnError::AllProvidersUnavailable { failures } => {
                failures.iter().any(HuginnError::is_retryable)
            }
            _ => false,
        }
    }

    /// Whether the failure points at configuration (keys, models, providers).
    pub fn is_configuration(&self) -> bool {
        match self {
            HuginnError::UnsupportedModel { .. }
            | HuginnError::UnknownProvider(_)
            | HuginnError::NoProvider
            | HuginnError::Configuration(_) => true,
            HuginnError::AllProvidersUnavailable { failures } => {
                !failures.is_empty() && failures.iter().all(HuginnError::is_configuration)
            }
            other => other.kind() == Some(ProviderErrorKind::AuthFailed),
        }
    }

    /// Whether the orchestrator may substitute the fallback provider.
    pub(crate) fn is_backend_unavailable(&self) -> bool {
        match self {
            HuginnError::Provider(_) | HuginnError::RetriesExhausted { .. } => self
                .kind()
                .is_some_and(|kind| kind.is_backend_unavailable()),
            _ => false,
        }
    }
}

fn join_failures(failures: &[HuginnError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
