//! Normalized completion result

use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Completed,
    /// Output hit the token limit.
    Truncated,
    /// Output was withheld or cut by the provider's content filter.
    Filtered,
}

/// What an adapter extracts from a provider's wire response.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub model: Option<String>,
    /// Opaque provider metadata (usage counters, response ids, ...).
    pub metadata: serde_json::Value,
}

/// The unified result handed back to callers.
///
/// Cached results are shared by every caller that asked for the same
/// fingerprint; each caller receives its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub text: String,
    #[serde(default)]
    pub finish_reason: FinishReason,
    pub provider: ProviderKind,
    pub model: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
