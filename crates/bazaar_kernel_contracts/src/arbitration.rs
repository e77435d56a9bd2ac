#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::candidate::{
    CandidateResult, ConfidenceScore, ExtractionPayload, PayloadSchema, SourceId,
};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const ARBITRATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionBasis {
    Agreement,
    SingleSourceOnly,
    Merged,
    FallbackBasic,
}

impl DecisionBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionBasis::Agreement => "AGREEMENT",
            DecisionBasis::SingleSourceOnly => "SINGLE_SOURCE_ONLY",
            DecisionBasis::Merged => "MERGED",
            DecisionBasis::FallbackBasic => "FALLBACK_BASIC",
        }
    }
}

/// The single authoritative interpretation of one input.
///
/// Built once by the arbitration engine and never mutated; reprocessing an
/// input produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitratedRecord {
    schema_version: SchemaVersion,
    schema: PayloadSchema,
    input_digest: String,
    final_payload: ExtractionPayload,
    decision_basis: DecisionBasis,
    confidence: ConfidenceScore,
    contributing_candidates: Vec<CandidateResult>,
}

impl ArbitratedRecord {
    pub fn v1(
        input_digest: String,
        final_payload: ExtractionPayload,
        decision_basis: DecisionBasis,
        confidence: ConfidenceScore,
        contributing_candidates: Vec<CandidateResult>,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: ARBITRATION_CONTRACT_VERSION,
            schema: final_payload.schema(),
            input_digest,
            final_payload,
            decision_basis,
            confidence,
            contributing_candidates,
        };
        r.validate()?;
        Ok(r)
    }

    pub fn schema(&self) -> PayloadSchema {
        self.schema
    }

    pub fn input_digest(&self) -> &str {
        &self.input_digest
    }

    pub fn final_payload(&self) -> &ExtractionPayload {
        &self.final_payload
    }

    pub fn decision_basis(&self) -> DecisionBasis {
        self.decision_basis
    }

    pub fn confidence(&self) -> ConfidenceScore {
        self.confidence
    }

    pub fn contributing_candidates(&self) -> &[CandidateResult] {
        &self.contributing_candidates
    }
}

impl Validate for ArbitratedRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ARBITRATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "arbitrated_record.schema_version",
                reason: "must match ARBITRATION_CONTRACT_VERSION",
            });
        }
        if self.input_digest.len() != 64 || !self.input_digest.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ContractViolation::InvalidValue {
                field: "arbitrated_record.input_digest",
                reason: "must be a 64-char hex digest",
            });
        }
        if self.final_payload.schema() != self.schema {
            return Err(ContractViolation::InvalidValue {
                field: "arbitrated_record.final_payload",
                reason: "must match record schema",
            });
        }
        self.final_payload.validate()?;
        if self.contributing_candidates.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "arbitrated_record.contributing_candidates",
                reason: "must not be empty",
            });
        }
        for c in &self.contributing_candidates {
            c.validate()?;
            if c.schema() != self.schema {
                return Err(ContractViolation::InvalidValue {
                    field: "arbitrated_record.contributing_candidates",
                    reason: "candidate schema must match record schema",
                });
            }
        }
        let sources: Vec<SourceId> = self
            .contributing_candidates
            .iter()
            .map(CandidateResult::source_id)
            .collect();
        let shape_ok = match self.decision_basis {
            DecisionBasis::Agreement | DecisionBasis::Merged => {
                sources == [SourceId::SourceA, SourceId::SourceB]
            }
            DecisionBasis::SingleSourceOnly => {
                sources.len() == 1 && sources[0].is_remote()
            }
            DecisionBasis::FallbackBasic => sources == [SourceId::LocalFallback],
        };
        if !shape_ok {
            return Err(ContractViolation::InvalidValue {
                field: "arbitrated_record.contributing_candidates",
                reason: "sources do not match decision basis",
            });
        }
        Ok(())
    }
}
