//! DeepSeek adapter (OpenAI-compatible chat completions).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::adapter::{AdapterSettings, classify_status, malformed, status_error};
use super::transport::{WireRequest, WireResponse};
use crate::config::SecretString;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::types::{Completion, CompletionRequest, FinishReason, ProviderKind};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
/// The public DeepSeek chat models are text-only.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 0;

#[derive(Debug, Clone)]
pub struct DeepSeekAdapter {
    settings: AdapterSettings,
}

impl DeepSeekAdapter {
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
        model.starts_with("deepseek-")
    }

    pub fn build_wire_request(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<WireRequest, ProviderError> {
        let content = match &request.attachment {
            Some(attachment) if self.settings.max_attachment_bytes > 0 => {
                MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: &request.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!(
                                "data:{};base64,{}",
                                attachment.mime_type,
                                STANDARD.encode(&attachment.data)
                            ),
                        },
                    },
                ])
            }
            _ => MessageContent::Text(&request.prompt),
        };

        // top_k has no equivalent in the chat completions API.
        let params = &request.params;
        let body = ChatRequest {
            model,
            messages: vec![Message {
                role: "user",
                content,
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: params.stop_sequences.iter().map(String::as_str).collect(),
            stream: false,
        };
        let body = serde_json::to_vec(&body).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                ProviderKind::DeepSeek,
                e.to_string(),
            )
        })?;

        Ok(WireRequest {
            url: format!(
                "{}/chat/completions",
                self.settings.base_url.trim_end_matches('/')
            ),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                (
                    "authorization".to_string(),
                    format!("Bearer {}", self.settings.api_key.expose()),
                ),
            ],
            body,
        })
    }

    pub fn parse_wire_response(&self, response: &WireResponse) -> Result<Completion, ProviderError> {
        if !(200..300).contains(&response.status) {
            return Err(status_error(
                ProviderKind::DeepSeek,
                deepseek_status_kind(response.status),
                response,
            ));
        }

        let parsed: ChatResponse = serde_json::from_slice(&response.body)
            .map_err(|e| malformed(ProviderKind::DeepSeek, e))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| malformed(ProviderKind::DeepSeek, "response has no choices"))?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Truncated,
            Some("content_filter") => FinishReason::Filtered,
            Some("insufficient_system_resource") => {
                return Err(ProviderError::new(
                    ProviderErrorKind::ProviderUnavailable,
                    ProviderKind::DeepSeek,
                    "generation interrupted: insufficient system resource",
                ));
            }
            _ => FinishReason::Completed,
        };

        let text = choice.message.content.unwrap_or_default();
        if text.is_empty() && finish_reason == FinishReason::Completed {
            return Err(malformed(ProviderKind::DeepSeek, "choice has no content"));
        }

        let mut metadata = serde_json::Map::new();
        if let Some(usage) = parsed.usage {
            metadata.insert("usage".to_string(), usage);
        }
        if let Some(id) = parsed.id {
            metadata.insert("response_id".to_string(), id.into());
        }
        if let Some(reasoning) = choice.message.reasoning_content {
            metadata.insert("reasoning".to_string(), reasoning.into());
        }

        Ok(Completion {
            text,
            finish_reason,
            model: parsed.model,
            metadata: serde_json::Value::Object(metadata),
        })
    }
}

/// 402 is "insufficient balance": an account problem, not a request problem.
fn deepseek_status_kind(status: u16) -> ProviderErrorKind {
    match status {
        402 => ProviderErrorKind::AuthFailed,
        status => classify_status(status),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}
