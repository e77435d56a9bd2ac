#![forbid(unsafe_code)]

use std::time::Duration;

use bazaar_kernel_contracts::candidate::{
    CandidateResult, ConfidenceScore, ExtractionPayload, PayloadSchema, SourceId,
};
use bazaar_kernel_contracts::TimestampMs;

use super::{ExtractionSource, RawInput, SourceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Payload(ExtractionPayload, ConfidenceScore),
    Unavailable(String),
    Malformed(String),
}

/// Deterministic source that replays a fixed outcome, optionally after a delay.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    source_id: SourceId,
    outcome: ScriptedOutcome,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new(source_id: SourceId, outcome: ScriptedOutcome) -> Self {
        Self {
            source_id,
            outcome,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn payload(source_id: SourceId, payload: ExtractionPayload, confidence: u8) -> Self {
        Self::new(
            source_id,
            ScriptedOutcome::Payload(payload, ConfidenceScore::saturating(i64::from(confidence))),
        )
    }

    pub fn unavailable(source_id: SourceId) -> Self {
        Self::new(source_id, ScriptedOutcome::Unavailable("scripted outage".to_string()))
    }
}

impl ExtractionSource for ScriptedSource {
    fn source_id(&self) -> SourceId {
        self.source_id
    }

    fn extract(
        &self,
        _input: &RawInput,
        schema: PayloadSchema,
    ) -> Result<CandidateResult, SourceError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &self.outcome {
            ScriptedOutcome::Payload(payload, confidence) => {
                if payload.schema() != schema {
                    return Err(SourceError::malformed(
                        self.source_id,
                        format!("expected {} payload", schema.as_str()),
                    ));
                }
                CandidateResult::v1(self.source_id, payload.clone(), *confidence, TimestampMs::now())
                    .map_err(|v| SourceError::malformed(self.source_id, v.to_string()))
            }
            ScriptedOutcome::Unavailable(detail) => {
                Err(SourceError::unavailable(self.source_id, detail.clone()))
            }
            ScriptedOutcome::Malformed(detail) => {
                Err(SourceError::malformed(self.source_id, detail.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_kernel_contracts::receipt::ReceiptPayload;
    use rust_decimal::Decimal;

    #[test]
    fn at_scripted_01_schema_mismatch_is_malformed() {
        let src = ScriptedSource::payload(
            SourceId::SourceA,
            ExtractionPayload::Receipt(ReceiptPayload::with_total(Decimal::new(10, 0))),
            80,
        );
        let err = src
            .extract(
                &RawInput::Query {
                    text: "raise rice by 5%".to_string(),
                },
                PayloadSchema::SimulationQuery,
            )
            .unwrap_err();
        assert!(matches!(err, SourceError::MalformedResponse { .. }));
    }

    #[test]
    fn at_scripted_02_payload_is_replayed() {
        let src = ScriptedSource::payload(
            SourceId::SourceB,
            ExtractionPayload::Receipt(ReceiptPayload::with_total(Decimal::new(10, 0))),
            150,
        );
        let c = src
            .extract(
                &RawInput::Query {
                    text: String::new(),
                },
                PayloadSchema::Receipt,
            )
            .unwrap();
        assert_eq!(c.source_id(), SourceId::SourceB);
        assert_eq!(c.confidence().value(), 100);
    }
}
