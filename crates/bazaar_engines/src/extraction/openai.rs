#![forbid(unsafe_code)]

use std::env;

use base64::Engine as _;
use bazaar_kernel_contracts::candidate::{
    CandidateResult, ConfidenceScore, PayloadSchema, SourceId,
};
use bazaar_kernel_contracts::TimestampMs;
use serde_json::{json, Value};

use super::{
    parse_candidate_content, system_prompt, ExtractionSource, RawInput, SourceError,
    SOURCE_TIMEOUT_MS_DEFAULT,
};
use crate::http::{build_http_agent, provider_error_from_ureq, ProviderCallError, DEFAULT_USER_AGENT};

pub const OPENAI_CHAT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiChatConfig {
    pub source_id: SourceId,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u32,
    pub default_confidence: ConfidenceScore,
}

impl OpenAiChatConfig {
    pub fn mvp_v1(source_id: SourceId, api_key: Option<String>) -> Self {
        Self {
            source_id,
            endpoint: OPENAI_CHAT_ENDPOINT.to_string(),
            api_key,
            model: "gpt-4o".to_string(),
            timeout_ms: SOURCE_TIMEOUT_MS_DEFAULT,
            default_confidence: ConfidenceScore::saturating(80),
        }
    }

    /// `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_ENDPOINT`.
    pub fn from_env(source_id: SourceId, timeout_ms: u32) -> Self {
        let mut cfg = Self::mvp_v1(source_id, non_empty_env("OPENAI_API_KEY"));
        if let Some(model) = non_empty_env("OPENAI_MODEL") {
            cfg.model = model;
        }
        if let Some(endpoint) = non_empty_env("OPENAI_ENDPOINT") {
            cfg.endpoint = endpoint;
        }
        cfg.timeout_ms = timeout_ms;
        cfg
    }
}

/// GPT-4o style chat-completions source. Images go in as base64 data URLs, text
/// uploads as plain text parts.
#[derive(Debug, Clone)]
pub struct OpenAiChatSource {
    config: OpenAiChatConfig,
}

impl OpenAiChatSource {
    pub fn new(config: OpenAiChatConfig) -> Self {
        Self { config }
    }

    fn request_body(&self, input: &RawInput, schema: PayloadSchema) -> Value {
        let user_content = match input {
            RawInput::Image {
                bytes,
                mime_type,
                hint_text,
            } if !mime_type.starts_with("image/") => {
                // Chat completions only accept images as `image_url`; text uploads go inline.
                let mut text = "Please extract the business data from this receipt text.".to_string();
                if let Some(hint) = hint_text {
                    text.push_str(" Note from the shopkeeper: ");
                    text.push_str(hint);
                }
                json!([
                    {"type": "text", "text": text},
                    {"type": "text", "text": String::from_utf8_lossy(bytes)}
                ])
            }
            RawInput::Image {
                bytes,
                mime_type,
                hint_text,
            } => {
                let data = base64::engine::general_purpose::STANDARD.encode(bytes);
                let mut text = "Please analyze this image and extract the business data.".to_string();
                if let Some(hint) = hint_text {
                    text.push_str(" Note from the shopkeeper: ");
                    text.push_str(hint);
                }
                json!([
                    {"type": "text", "text": text},
                    {"type": "image_url", "image_url": {"url": format!("data:{mime_type};base64,{data}")}}
                ])
            }
            RawInput::Query { text } => Value::String(text.clone()),
        };
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt(schema)},
                {"role": "user", "content": user_content}
            ],
            "max_tokens": 1000,
            "temperature": 0.1,
            "response_format": {"type": "json_object"}
        })
    }

    fn call(&self, api_key: &str, body: Value) -> Result<Value, ProviderCallError> {
        let agent = build_http_agent(self.config.timeout_ms, DEFAULT_USER_AGENT)
            .map_err(|_| ProviderCallError::new("openai", "config_invalid", None))?;
        let response = agent
            .post(&self.config.endpoint)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {api_key}"))
            .set("Accept", "application/json")
            .send_json(body)
            .map_err(|e| provider_error_from_ureq("openai", e))?;
        serde_json::from_reader(response.into_reader())
            .map_err(|_| ProviderCallError::new("openai", "json_parse", None))
    }
}

impl ExtractionSource for OpenAiChatSource {
    fn source_id(&self) -> SourceId {
        self.config.source_id
    }

    fn extract(
        &self,
        input: &RawInput,
        schema: PayloadSchema,
    ) -> Result<CandidateResult, SourceError> {
        let source_id = self.config.source_id;
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(SourceError::unavailable(source_id, "api key not configured"));
        };
        let envelope = self
            .call(api_key, self.request_body(input, schema))
            .map_err(|e| match e.error_kind {
                "json_parse" => SourceError::malformed(source_id, e.safe_detail()),
                _ => SourceError::unavailable(source_id, e.safe_detail()),
            })?;
        let content = envelope
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::malformed(source_id, "no message content"))?;
        tracing::debug!(source = source_id.as_str(), chars = content.len(), "openai content received");
        parse_candidate_content(
            source_id,
            schema,
            content,
            self.config.default_confidence,
            TimestampMs::now(),
        )
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_openai_01_missing_key_is_unavailable_not_fatal() {
        let src = OpenAiChatSource::new(OpenAiChatConfig::mvp_v1(SourceId::SourceA, None));
        let err = src
            .extract(
                &RawInput::Query {
                    text: "what if I raise rice by 5%".to_string(),
                },
                PayloadSchema::SimulationQuery,
            )
            .unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable { .. }));
    }

    #[test]
    fn at_openai_02_image_request_carries_data_url() {
        let src = OpenAiChatSource::new(OpenAiChatConfig::mvp_v1(SourceId::SourceA, None));
        let body = src.request_body(
            &RawInput::Image {
                bytes: vec![1, 2, 3],
                mime_type: "image/png".to_string(),
                hint_text: None,
            },
            PayloadSchema::Receipt,
        );
        let url = body
            .pointer("/messages/1/content/1/image_url/url")
            .and_then(Value::as_str)
            .unwrap();
        assert_eq!(url, "data:image/png;base64,AQID");
    }

    #[test]
    fn at_openai_03_text_upload_is_sent_as_text() {
        let src = OpenAiChatSource::new(OpenAiChatConfig::mvp_v1(SourceId::SourceA, None));
        let body = src.request_body(
            &RawInput::Image {
                bytes: b"RICE 2KG 120\nTOTAL 120".to_vec(),
                mime_type: "text/plain".to_string(),
                hint_text: Some("morning stock".to_string()),
            },
            PayloadSchema::Receipt,
        );
        let parts = body.pointer("/messages/1/content").and_then(Value::as_array).unwrap();
        assert!(parts.iter().all(|p| p["type"] == "text"));
        assert!(!body.to_string().contains("image_url"));
        assert_eq!(parts[1]["text"], "RICE 2KG 120\nTOTAL 120");
        assert!(parts[0]["text"].as_str().unwrap().contains("morning stock"));
    }
}
