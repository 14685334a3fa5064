//! The closed set of provider adapters.
//!
//! Each backend is one variant of [`ProviderAdapter`] with two pure mapping
//! functions: request -> [`WireRequest`] and [`WireResponse`] -> completion.
//! Adapters hold only static configuration; network I/O happens in the
//! [`Transport`](super::Transport) and health lives in the registry.

use serde::Deserialize;

use super::deepseek::DeepSeekAdapter;
use super::gemini::GeminiAdapter;
use super::transport::{WireRequest, WireResponse};
use crate::config::SecretString;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::types::{Completion, CompletionRequest, ProviderKind};

/// Static configuration shared by every adapter.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub api_key: SecretString,
    pub base_url: String,
    pub default_model: String,
    /// Largest attachment this provider accepts. 0 = attachments unsupported.
    pub max_attachment_bytes: usize,
}

/// One variant per supported backend.
#[derive(Debug, Clone)]
pub enum ProviderAdapter {
    Gemini(GeminiAdapter),
    DeepSeek(DeepSeekAdapter),
}

impl ProviderAdapter {
    /// Adapter for `kind` with that provider's default endpoint and model.
    pub fn new(kind: ProviderKind, api_key: impl Into<SecretString>) -> Self {
        match kind {
            ProviderKind::Gemini => ProviderAdapter::Gemini(GeminiAdapter::new(api_key)),
            ProviderKind::DeepSeek => ProviderAdapter::DeepSeek(DeepSeekAdapter::new(api_key)),
        }
    }

    /// Adapter for `kind` with explicit settings.
    pub fn with_settings(kind: ProviderKind, settings: AdapterSettings) -> Self {
        match kind {
            ProviderKind::Gemini => ProviderAdapter::Gemini(GeminiAdapter::with_settings(settings)),
            ProviderKind::DeepSeek => {
                ProviderAdapter::DeepSeek(DeepSeekAdapter::with_settings(settings))
            }
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderAdapter::Gemini(_) => ProviderKind::Gemini,
            ProviderAdapter::DeepSeek(_) => ProviderKind::DeepSeek,
        }
    }

    pub fn settings(&self) -> &AdapterSettings {
        match self {
            ProviderAdapter::Gemini(a) => a.settings(),
            ProviderAdapter::DeepSeek(a) => a.settings(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.settings().default_model
    }

    pub fn max_attachment_bytes(&self) -> usize {
        self.settings().max_attachment_bytes
    }

    /// Whether this backend recognizes `model`.
    pub fn supports_model(&self, model: &str) -> bool {
        match self {
            ProviderAdapter::Gemini(_) => GeminiAdapter::supports_model(model),
            ProviderAdapter::DeepSeek(_) => DeepSeekAdapter::supports_model(model),
        }
    }

    pub fn build_wire_request(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<WireRequest, ProviderError> {
        match self {
            ProviderAdapter::Gemini(a) => a.build_wire_request(request, model),
            ProviderAdapter::DeepSeek(a) => a.build_wire_request(request, model),
        }
    }

    pub fn parse_wire_response(&self, response: &WireResponse) -> Result<Completion, ProviderError> {
        match self {
            ProviderAdapter::Gemini(a) => a.parse_wire_response(response),
            ProviderAdapter::DeepSeek(a) => a.parse_wire_response(response),
        }
    }
}

// ============================================================================
// Shared wire helpers
// ============================================================================

/// Error envelope used by both Gemini and OpenAI-compatible APIs:
/// `{"error": {"message": "...", "status"|"type": "..."}}`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "type")]
    status: Option<String>,
}

/// Default HTTP status classification.
pub(crate) fn classify_status(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::AuthFailed,
        408 | 504 => ProviderErrorKind::Timeout,
        429 => ProviderErrorKind::RateLimited,
        400..=499 => ProviderErrorKind::InvalidRequest,
        _ => ProviderErrorKind::ProviderUnavailable,
    }
}

/// Human-readable diagnostic for a non-success response.
///
/// Prefers the provider's own error message; falls back to a truncated body.
pub(crate) fn error_diagnostic(response: &WireResponse) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        let message = envelope.error.message.unwrap_or_default();
        return match envelope.error.status {
            Some(status) => format!("HTTP {} {}: {}", response.status, status, message),
            None => format!("HTTP {}: {}", response.status, message),
        };
    }
    let body = String::from_utf8_lossy(&response.body);
    let snippet: String = body.chars().take(200).collect();
    format!("HTTP {}: {}", response.status, snippet)
}

/// Build a [`ProviderError`] for a non-success response, honouring `Retry-After`.
pub(crate) fn status_error(
    provider: ProviderKind,
    kind: ProviderErrorKind,
    response: &WireResponse,
) -> ProviderError {
    ProviderError::new(kind, provider, error_diagnostic(response)).with_retry_after(
        if kind == ProviderErrorKind::RateLimited {
            response.retry_after
        } else {
            None
        },
    )
}

pub(crate) fn malformed(provider: ProviderKind, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::new(ProviderErrorKind::MalformedResponse, provider, err.to_string())
}
