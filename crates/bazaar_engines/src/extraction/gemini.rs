#![forbid(unsafe_code)]

use base64::Engine as _;
use bazaar_kernel_contracts::candidate::{
    CandidateResult, ConfidenceScore, PayloadSchema, SourceId,
};
use bazaar_kernel_contracts::TimestampMs;
use serde_json::{json, Value};

use super::openai::non_empty_env;
use super::{
    parse_candidate_content, system_prompt, ExtractionSource, RawInput, SourceError,
    SOURCE_TIMEOUT_MS_DEFAULT,
};
use crate::http::{build_http_agent, provider_error_from_ureq, ProviderCallError, DEFAULT_USER_AGENT};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub source_id: SourceId,
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u32,
    pub default_confidence: ConfidenceScore,
}

impl GeminiConfig {
    pub fn mvp_v1(source_id: SourceId, api_key: Option<String>) -> Self {
        Self {
            source_id,
            api_base: GEMINI_API_BASE.to_string(),
            api_key,
            model: "gemini-1.5-flash".to_string(),
            timeout_ms: SOURCE_TIMEOUT_MS_DEFAULT,
            default_confidence: ConfidenceScore::saturating(75),
        }
    }

    /// `GOOGLE_API_KEY`, `GEMINI_MODEL`, `GEMINI_API_BASE`.
    pub fn from_env(source_id: SourceId, timeout_ms: u32) -> Self {
        let mut cfg = Self::mvp_v1(source_id, non_empty_env("GOOGLE_API_KEY"));
        if let Some(model) = non_empty_env("GEMINI_MODEL") {
            cfg.model = model;
        }
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            cfg.api_base = base;
        }
        cfg.timeout_ms = timeout_ms;
        cfg
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        )
    }
}

/// Gemini `generateContent` source with inline image data.
#[derive(Debug, Clone)]
pub struct GeminiSource {
    config: GeminiConfig,
}

impl GeminiSource {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    fn request_body(&self, input: &RawInput, schema: PayloadSchema) -> Value {
        let mut parts = vec![json!({"text": system_prompt(schema)})];
        match input {
            RawInput::Image {
                bytes,
                mime_type,
                hint_text,
            } => {
                if let Some(hint) = hint_text {
                    parts.push(json!({"text": format!("Note from the shopkeeper: {hint}")}));
                }
                parts.push(json!({
                    "inline_data": {
                        "mime_type": mime_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                    }
                }));
            }
            RawInput::Query { text } => parts.push(json!({"text": text})),
        }
        json!({
            "contents": [{"role": "user", "parts": parts}],
            "generationConfig": {
                "temperature": 0.1,
                "maxOutputTokens": 1000,
                "responseMimeType": "application/json"
            }
        })
    }

    fn call(&self, api_key: &str, body: Value) -> Result<Value, ProviderCallError> {
        let agent = build_http_agent(self.config.timeout_ms, DEFAULT_USER_AGENT)
            .map_err(|_| ProviderCallError::new("gemini", "config_invalid", None))?;
        let response = agent
            .post(&self.config.endpoint())
            .set("Content-Type", "application/json")
            .set("x-goog-api-key", api_key)
            .send_json(body)
            .map_err(|e| provider_error_from_ureq("gemini", e))?;
        serde_json::from_reader(response.into_reader())
            .map_err(|_| ProviderCallError::new("gemini", "json_parse", None))
    }
}

impl ExtractionSource for GeminiSource {
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
        let text = envelope
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::malformed(source_id, "no candidate text"))?;
        tracing::debug!(source = source_id.as_str(), chars = text.len(), "gemini content received");
        parse_candidate_content(
            source_id,
            schema,
            text,
            self.config.default_confidence,
            TimestampMs::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_gemini_01_endpoint_uses_model() {
        let cfg = GeminiConfig::mvp_v1(SourceId::SourceB, None);
        assert_eq!(
            cfg.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn at_gemini_02_query_request_has_prompt_and_text_parts() {
        let src = GeminiSource::new(GeminiConfig::mvp_v1(SourceId::SourceB, None));
        let body = src.request_body(
            &RawInput::Query {
                text: "bulk order of sugar with 10 shops".to_string(),
            },
            PayloadSchema::SimulationQuery,
        );
        let parts = body.pointer("/contents/0/parts").and_then(Value::as_array).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1].get("text").and_then(Value::as_str),
            Some("bulk order of sugar with 10 shops")
        );
    }

    #[test]
    fn at_gemini_03_missing_key_is_unavailable() {
        let src = GeminiSource::new(GeminiConfig::mvp_v1(SourceId::SourceB, None));
        let err = src
            .extract(
                &RawInput::Query {
                    text: "x".to_string(),
                },
                PayloadSchema::SimulationQuery,
            )
            .unwrap_err();
        assert_eq!(err.source_id(), SourceId::SourceB);
    }
}
