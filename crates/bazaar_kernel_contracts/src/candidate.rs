#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::receipt::ReceiptPayload;
use crate::simquery::SimulationQueryPayload;
use crate::{ContractViolation, SchemaVersion, TimestampMs, Validate};

pub const CANDIDATE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Which interpretation source produced a candidate.
///
/// `LocalFallback` is the deterministic heuristic that runs only when both
/// remote sources failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceId {
    SourceA,
    SourceB,
    LocalFallback,
}

impl SourceId {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceId::SourceA => "SOURCE_A",
            SourceId::SourceB => "SOURCE_B",
            SourceId::LocalFallback => "LOCAL_FALLBACK",
        }
    }

    pub fn is_remote(self) -> bool {
        !matches!(self, SourceId::LocalFallback)
    }

    /// The other remote source. `LocalFallback` has no peer.
    pub fn peer(self) -> Option<SourceId> {
        match self {
            SourceId::SourceA => Some(SourceId::SourceB),
            SourceId::SourceB => Some(SourceId::SourceA),
            SourceId::LocalFallback => None,
        }
    }
}

/// Confidence in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ConfidenceScore(u8);

impl ConfidenceScore {
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Result<Self, ContractViolation> {
        if value > Self::MAX {
            return Err(ContractViolation::InvalidRange {
                field: "confidence_score",
                min: 0.0,
                max: Self::MAX as f64,
                got: value as f64,
            });
        }
        Ok(Self(value))
    }

    /// Clamp an arbitrary integer into range.
    pub fn saturating(value: i64) -> Self {
        Self(value.clamp(0, Self::MAX as i64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ConfidenceScore {
    type Error = ContractViolation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConfidenceScore> for u8 {
    fn from(value: ConfidenceScore) -> Self {
        value.0
    }
}

/// Names the record shape an extraction is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadSchema {
    Receipt,
    SimulationQuery,
}

impl PayloadSchema {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadSchema::Receipt => "RECEIPT",
            PayloadSchema::SimulationQuery => "SIMULATION_QUERY",
        }
    }
}

/// Validated, tagged structured payload. One variant per record shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ExtractionPayload {
    Receipt(ReceiptPayload),
    SimulationQuery(SimulationQueryPayload),
}

impl ExtractionPayload {
    pub fn schema(&self) -> PayloadSchema {
        match self {
            ExtractionPayload::Receipt(_) => PayloadSchema::Receipt,
            ExtractionPayload::SimulationQuery(_) => PayloadSchema::SimulationQuery,
        }
    }

    pub fn as_receipt(&self) -> Option<&ReceiptPayload> {
        match self {
            ExtractionPayload::Receipt(r) => Some(r),
            ExtractionPayload::SimulationQuery(_) => None,
        }
    }

    pub fn as_simulation_query(&self) -> Option<&SimulationQueryPayload> {
        match self {
            ExtractionPayload::SimulationQuery(q) => Some(q),
            ExtractionPayload::Receipt(_) => None,
        }
    }
}

impl Validate for ExtractionPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            ExtractionPayload::Receipt(r) => r.validate(),
            ExtractionPayload::SimulationQuery(q) => q.validate(),
        }
    }
}

/// One source's structured interpretation of a raw input. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResult {
    schema_version: SchemaVersion,
    source_id: SourceId,
    payload: ExtractionPayload,
    confidence: ConfidenceScore,
    produced_at: TimestampMs,
}

impl CandidateResult {
    pub fn v1(
        source_id: SourceId,
        payload: ExtractionPayload,
        confidence: ConfidenceScore,
        produced_at: TimestampMs,
    ) -> Result<Self, ContractViolation> {
        let c = Self {
            schema_version: CANDIDATE_CONTRACT_VERSION,
            source_id,
            payload,
            confidence,
            produced_at,
        };
        c.validate()?;
        Ok(c)
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn payload(&self) -> &ExtractionPayload {
        &self.payload
    }

    pub fn confidence(&self) -> ConfidenceScore {
        self.confidence
    }

    pub fn produced_at(&self) -> TimestampMs {
        self.produced_at
    }

    pub fn schema(&self) -> PayloadSchema {
        self.payload.schema()
    }
}

impl Validate for CandidateResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != CANDIDATE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "candidate_result.schema_version",
                reason: "must match CANDIDATE_CONTRACT_VERSION",
            });
        }
        self.payload.validate()
    }
}
