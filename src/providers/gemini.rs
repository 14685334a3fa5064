//! Google Gemini adapter (`generateContent` REST API).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::adapter::{AdapterSettings, classify_status, malformed, status_error};
use super::transport::{WireRequest, WireResponse};
use crate::config::SecretString;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::types::{Completion, CompletionRequest, FinishReason, ProviderKind};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
/// Inline data limit for a single `generateContent` request.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 20 * 1024 * 1024;

const SAFETY_CATEGORY: &str = "HARM_CATEGORY_HARASSMENT";
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    settings: AdapterSettings,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self::with_settings(AdapterSettings {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        })
    }

    pub fn with_settings(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn supports_model(model: &str) -> bool {
        model.starts_with("gemini-")
    }

    pub fn build_wire_request(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<WireRequest, ProviderError> {
        let mut parts = vec![Part::Text {
            text: &request.prompt,
        }];
        if let Some(attachment) = &request.attachment {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: &attachment.mime_type,
                    data: STANDARD.encode(&attachment.data),
                },
            });
        }

        let params = &request.params;
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                top_p: params.top_p,
                top_k: params.top_k,
                stop_sequences: params.stop_sequences.iter().map(String::as_str).collect(),
            },
            safety_settings: vec![SafetySetting {
                category: SAFETY_CATEGORY,
                threshold: SAFETY_THRESHOLD,
            }],
        };
        let body = serde_json::to_vec(&body).map_err(|e| {
            ProviderError::new(ProviderErrorKind::InvalidRequest, ProviderKind::Gemini, e.to_string())
        })?;

        Ok(WireRequest {
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                self.settings.base_url.trim_end_matches('/'),
                model
            ),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                (
                    "x-goog-api-key".to_string(),
                    self.settings.api_key.expose().to_string(),
                ),
            ],
            body,
        })
    }

    pub fn parse_wire_response(&self, response: &WireResponse) -> Result<Completion, ProviderError> {
        if !(200..300).contains(&response.status) {
            return Err(status_error(
                ProviderKind::Gemini,
                gemini_status_kind(response),
                response,
            ));
        }

        let parsed: GenerateContentResponse = serde_json::from_slice(&response.body)
            .map_err(|e| malformed(ProviderKind::Gemini, e))?;

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                ProviderKind::Gemini,
                format!("prompt blocked: {reason}"),
            ));
        }

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| malformed(ProviderKind::Gemini, "response has no candidates"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        let finish_reason = finish_reason(candidate.finish_reason.as_deref());

        if text.is_empty() && finish_reason == FinishReason::Completed {
            return Err(malformed(ProviderKind::Gemini, "candidate has no text"));
        }

        let mut metadata = serde_json::Map::new();
        if let Some(usage) = parsed.usage_metadata {
            metadata.insert("usage".to_string(), usage);
        }
        if let Some(id) = parsed.response_id {
            metadata.insert("response_id".to_string(), id.into());
        }

        Ok(Completion {
            text,
            finish_reason,
            model: parsed.model_version,
            metadata: serde_json::Value::Object(metadata),
        })
    }
}

/// Gemini reports a bad API key as a plain 400.
fn gemini_status_kind(response: &WireResponse) -> ProviderErrorKind {
    if response.status == 400 && String::from_utf8_lossy(&response.body).contains("API key") {
        return ProviderErrorKind::AuthFailed;
    }
    classify_status(response.status)
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("MAX_TOKENS") => FinishReason::Truncated,
        Some("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII") => {
            FinishReason::Filtered
        }
        _ => FinishReason::Completed,
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<&'a str>,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<serde_json::Value>,
    model_version: Option<String>,
    response_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
