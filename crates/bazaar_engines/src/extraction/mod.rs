#![forbid(unsafe_code)]

//! Extraction / parsing adapters.
//!
//! Every source turns a raw input into a [`CandidateResult`] of the requested
//! [`PayloadSchema`] or fails with [`SourceError`]. LLM output is parsed into
//! the tagged payload here and nowhere else.

pub mod gemini;
pub mod openai;
pub mod scripted;

use std::borrow::Cow;

use bazaar_kernel_contracts::candidate::{
    CandidateResult, ConfidenceScore, ExtractionPayload, PayloadSchema, SourceId,
};
use bazaar_kernel_contracts::receipt::ReceiptPayload;
use bazaar_kernel_contracts::simquery::{SimulationQueryPayload, SimulationScenario};
use bazaar_kernel_contracts::TimestampMs;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub use gemini::{GeminiConfig, GeminiSource};
pub use openai::{OpenAiChatConfig, OpenAiChatSource};
pub use scripted::{ScriptedOutcome, ScriptedSource};

pub const SOURCE_TIMEOUT_MS_DEFAULT: u32 = 15_000;
pub const IMAGE_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Raw input handed to every source for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawInput {
    Image {
        bytes: Vec<u8>,
        mime_type: String,
        /// Optional caption or note supplied with the upload.
        hint_text: Option<String>,
    },
    Query {
        text: String,
    },
}

impl RawInput {
    /// SHA-256 hex of the input, stable across runs.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            RawInput::Image {
                bytes, mime_type, ..
            } => {
                hasher.update(b"image\0");
                hasher.update(mime_type.as_bytes());
                hasher.update(b"\0");
                hasher.update(bytes);
            }
            RawInput::Query { text } => {
                hasher.update(b"query\0");
                hasher.update(text.trim().as_bytes());
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Text the local fallback heuristic can work from, if any.
    pub fn fallback_text(&self) -> Option<Cow<'_, str>> {
        match self {
            RawInput::Query { text } => Some(Cow::Borrowed(text.as_str())),
            RawInput::Image {
                bytes, hint_text, ..
            } => {
                let mut combined = String::new();
                if let Ok(as_text) = std::str::from_utf8(bytes) {
                    combined.push_str(as_text);
                }
                if let Some(hint) = hint_text {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(hint);
                }
                if combined.trim().is_empty() {
                    None
                } else {
                    Some(Cow::Owned(combined))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source {source_id:?} unavailable: {detail}")]
    SourceUnavailable { source_id: SourceId, detail: String },
    #[error("source {source_id:?} returned malformed data: {detail}")]
    MalformedResponse { source_id: SourceId, detail: String },
}

impl SourceError {
    pub fn unavailable(source_id: SourceId, detail: impl Into<String>) -> Self {
        SourceError::SourceUnavailable {
            source_id,
            detail: detail.into(),
        }
    }

    pub fn malformed(source_id: SourceId, detail: impl Into<String>) -> Self {
        SourceError::MalformedResponse {
            source_id,
            detail: detail.into(),
        }
    }

    pub fn source_id(&self) -> SourceId {
        match self {
            SourceError::SourceUnavailable { source_id, .. }
            | SourceError::MalformedResponse { source_id, .. } => *source_id,
        }
    }
}

/// One independent interpretation source. Implementations are stateless
/// per call and blocking; the orchestrator runs them on blocking threads.
pub trait ExtractionSource: Send + Sync {
    fn source_id(&self) -> SourceId;

    fn extract(
        &self,
        input: &RawInput,
        schema: PayloadSchema,
    ) -> Result<CandidateResult, SourceError>;
}

pub fn system_prompt(schema: PayloadSchema) -> &'static str {
    match schema {
        PayloadSchema::Receipt => RECEIPT_PROMPT,
        PayloadSchema::SimulationQuery => SIMULATION_PROMPT,
    }
}

const RECEIPT_PROMPT: &str = "You extract business data from photos of receipts, bills and \
handwritten shop notes. Respond with ONLY a JSON object, no prose, with keys: \
vendor (string or null), date (YYYY-MM-DD or null), currency (ISO code or null), \
items (array of {name, quantity, unit_price, line_total}), total (number or null), \
confidence (integer 0-100, how sure you are of the total).";

const SIMULATION_PROMPT: &str = "You parse a shopkeeper's what-if business question. Respond \
with ONLY a JSON object, no prose, with keys: scenario (one of increase_price, \
decrease_price, bulk_order, inventory_change), item (product name, lowercase), \
change_percent (number, percent change; negative for decreases), shop_count \
(integer or null; number of shops ordering together for bulk_order), confidence \
(integer 0-100).";

/// Parse one LLM response body into a candidate of the requested schema.
pub fn parse_candidate_content(
    source_id: SourceId,
    schema: PayloadSchema,
    content: &str,
    default_confidence: ConfidenceScore,
    produced_at: TimestampMs,
) -> Result<CandidateResult, SourceError> {
    let cleaned = strip_code_fences(content);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| SourceError::malformed(source_id, format!("json: {e}")))?;
    let Value::Object(mut obj) = value else {
        return Err(SourceError::malformed(source_id, "expected a JSON object"));
    };
    let confidence = obj
        .remove("confidence")
        .and_then(|v| confidence_from_json(&v))
        .unwrap_or(default_confidence);

    let payload = match schema {
        PayloadSchema::Receipt => {
            let r: ReceiptPayload = serde_json::from_value(Value::Object(obj))
                .map_err(|e| SourceError::malformed(source_id, format!("receipt: {e}")))?;
            ExtractionPayload::Receipt(r)
        }
        PayloadSchema::SimulationQuery => {
            normalize_simulation_object(&mut obj);
            let q: SimulationQueryPayload = serde_json::from_value(Value::Object(obj))
                .map_err(|e| SourceError::malformed(source_id, format!("simulation: {e}")))?;
            ExtractionPayload::SimulationQuery(align_change_sign(q))
        }
    };

    CandidateResult::v1(source_id, payload, confidence, produced_at)
        .map_err(|v| SourceError::malformed(source_id, v.to_string()))
}

pub fn strip_code_fences(content: &str) -> &str {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Accepts 0-100 numbers, 0.0-1.0 fractions, the same as numeric strings,
/// `NN%` percentages, or `high|medium|low`.
fn confidence_from_json(v: &Value) -> Option<ConfidenceScore> {
    match v {
        Value::Number(n) => confidence_from_number(n.as_f64()?),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(ConfidenceScore::saturating(90)),
            "medium" => Some(ConfidenceScore::saturating(70)),
            "low" => Some(ConfidenceScore::saturating(40)),
            other => match other.strip_suffix('%') {
                Some(percent) => percent
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| ConfidenceScore::saturating(f.round() as i64)),
                None => other.parse::<f64>().ok().and_then(confidence_from_number),
            },
        },
        _ => None,
    }
}

fn confidence_from_number(f: f64) -> Option<ConfidenceScore> {
    if !f.is_finite() {
        return None;
    }
    let scaled = if f <= 1.0 { f * 100.0 } else { f };
    Some(ConfidenceScore::saturating(scaled.round() as i64))
}

/// LLMs like to answer `"change": "+5%"`; turn such strings into numbers and
/// lowercase the item.
fn normalize_simulation_object(obj: &mut Map<String, Value>) {
    for key in ["change_percent", "change"] {
        if let Some(Value::String(raw)) = obj.get(key) {
            let cleaned: String = raw
                .chars()
                .filter(|c| !matches!(c, '%' | '+' | ' '))
                .collect();
            if let Ok(d) = cleaned.parse::<Decimal>() {
                obj.insert(key.to_string(), Value::String(d.to_string()));
            }
        }
    }
    if let Some(Value::String(item)) = obj.get("item") {
        let lowered = item.trim().to_lowercase();
        obj.insert("item".to_string(), Value::String(lowered));
    }
}

/// Price scenarios carry their direction in the scenario; make the sign agree
/// so two sources answering `5` and `-5` for a decrease compare equal.
fn align_change_sign(mut q: SimulationQueryPayload) -> SimulationQueryPayload {
    match q.scenario {
        SimulationScenario::IncreasePrice => q.change_percent = q.change_percent.abs(),
        SimulationScenario::DecreasePrice => q.change_percent = -q.change_percent.abs(),
        SimulationScenario::BulkOrder | SimulationScenario::InventoryChange => {}
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(v: u8) -> ConfidenceScore {
        ConfidenceScore::new(v).unwrap()
    }

    #[test]
    fn at_extract_01_fenced_receipt_json_parses() {
        let content = "```json\n{\"total\": 105.00, \"vendor\": \"Gupta Stores\", \"confidence\": 0.9}\n```";
        let c = parse_candidate_content(
            SourceId::SourceA,
            PayloadSchema::Receipt,
            content,
            conf(50),
            TimestampMs(1),
        )
        .unwrap();
        assert_eq!(c.confidence().value(), 90);
        let r = c.payload().as_receipt().unwrap();
        assert_eq!(r.total, Some(Decimal::new(105, 0)));
    }

    #[test]
    fn at_extract_02_missing_confidence_uses_source_default() {
        let c = parse_candidate_content(
            SourceId::SourceB,
            PayloadSchema::Receipt,
            r#"{"total": 12}"#,
            conf(75),
            TimestampMs(1),
        )
        .unwrap();
        assert_eq!(c.confidence().value(), 75);
    }

    #[test]
    fn at_extract_09_string_confidence_reads_like_numbers() {
        let read = |raw: &str| {
            parse_candidate_content(
                SourceId::SourceA,
                PayloadSchema::Receipt,
                &format!(r#"{{"total": 10, "confidence": {raw}}}"#),
                conf(50),
                TimestampMs(1),
            )
            .unwrap()
            .confidence()
            .value()
        };
        assert_eq!(read("0.9"), 90);
        assert_eq!(read(r#""0.9""#), 90);
        assert_eq!(read(r#""85%""#), 85);
        assert_eq!(read(r#""1%""#), 1);
        assert_eq!(read(r#""72""#), 72);
        assert_eq!(read(r#""High""#), 90);
        assert_eq!(read(r#""sure""#), 50);
    }

    #[test]
    fn at_extract_03_non_object_is_malformed() {
        let err = parse_candidate_content(
            SourceId::SourceA,
            PayloadSchema::Receipt,
            "[1,2,3]",
            conf(50),
            TimestampMs(1),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::MalformedResponse { .. }));
    }

    #[test]
    fn at_extract_04_schema_violation_is_malformed() {
        let err = parse_candidate_content(
            SourceId::SourceA,
            PayloadSchema::Receipt,
            r#"{"vendor": "x"}"#,
            conf(50),
            TimestampMs(1),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::MalformedResponse { .. }));
    }

    #[test]
    fn at_extract_05_simulation_change_string_and_sign_normalize() {
        let c = parse_candidate_content(
            SourceId::SourceA,
            PayloadSchema::SimulationQuery,
            r#"{"scenario":"decrease_price","item":" Rice ","change":"+10%","confidence":"high"}"#,
            conf(50),
            TimestampMs(1),
        )
        .unwrap();
        let q = c.payload().as_simulation_query().unwrap();
        assert_eq!(q.item, "rice");
        assert_eq!(q.change_percent, Decimal::new(-10, 0));
        assert_eq!(c.confidence().value(), 90);
    }

    #[test]
    fn at_extract_06_unknown_scenario_is_malformed() {
        let err = parse_candidate_content(
            SourceId::SourceB,
            PayloadSchema::SimulationQuery,
            r#"{"scenario":"launch_rocket","item":"rice","change_percent":5}"#,
            conf(50),
            TimestampMs(1),
        )
        .unwrap_err();
        assert_eq!(err.source_id(), SourceId::SourceB);
    }

    #[test]
    fn at_extract_07_digest_is_stable_and_input_sensitive() {
        let a = RawInput::Query {
            text: "what if rice +5%".to_string(),
        };
        let b = RawInput::Query {
            text: "  what if rice +5%  ".to_string(),
        };
        let c = RawInput::Query {
            text: "what if rice +6%".to_string(),
        };
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn at_extract_08_image_fallback_text_combines_utf8_body_and_hint() {
        let img = RawInput::Image {
            bytes: vec![0xff, 0xd8, 0xff],
            mime_type: "image/jpeg".to_string(),
            hint_text: Some("Total 40".to_string()),
        };
        assert_eq!(img.fallback_text().as_deref(), Some("Total 40"));
        let bare = RawInput::Image {
            bytes: vec![0xff, 0xd8],
            mime_type: "image/jpeg".to_string(),
            hint_text: None,
        };
        assert!(bare.fallback_text().is_none());
    }
}
