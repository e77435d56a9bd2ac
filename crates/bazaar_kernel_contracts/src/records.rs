#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::arbitration::ArbitratedRecord;
use crate::candidate::PayloadSchema;
use crate::common::validate_token;
use crate::simulation::SimulationOutcome;
use crate::{ContractViolation, TimestampMs, Validate};

pub const LIST_LIMIT_DEFAULT: u32 = 50;
pub const LIST_LIMIT_MAX: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_token("owner_id", &id, 128)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_token("record_id", &id, 64)?;
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ContractViolation::InvalidValue {
                field: "record_id",
                reason: "must be ascii alphanumeric or '-'",
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Transaction,
    Simulation,
}

impl RecordKind {
    pub fn table(self) -> &'static str {
        match self {
            RecordKind::Transaction => "transactions",
            RecordKind::Simulation => "simulations",
        }
    }
}

/// A receipt/bill extraction owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTransaction {
    pub id: RecordId,
    pub owner: OwnerId,
    /// Client-supplied label such as `image`, `receipt` or `bill`.
    pub source: String,
    pub raw_input_ref: String,
    pub record: ArbitratedRecord,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

/// Draft handed to the gateway; identity and timestamps are assigned on commit.
/// `source` is stored lowercased so every backend filters it by plain equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDraft {
    pub source: String,
    pub raw_input_ref: String,
    pub record: ArbitratedRecord,
}

impl TransactionDraft {
    pub fn v1(
        source: impl Into<String>,
        raw_input_ref: impl Into<String>,
        record: ArbitratedRecord,
    ) -> Result<Self, ContractViolation> {
        let d = Self {
            source: source.into().trim().to_ascii_lowercase(),
            raw_input_ref: raw_input_ref.into(),
            record,
        };
        d.validate()?;
        Ok(d)
    }
}

pub const TRANSACTION_SOURCE_MAX_LEN: usize = 32;
pub const RAW_INPUT_REF_MAX_LEN: usize = 512;

/// Client label stored with a transaction (`image`, `receipt`, `bill`, ...).
pub fn validate_transaction_source(source: &str) -> Result<(), ContractViolation> {
    validate_token("transaction.source", source, TRANSACTION_SOURCE_MAX_LEN)
}

pub fn validate_raw_input_ref(raw_input_ref: &str) -> Result<(), ContractViolation> {
    if raw_input_ref.len() > RAW_INPUT_REF_MAX_LEN {
        return Err(ContractViolation::InvalidValue {
            field: "transaction.raw_input_ref",
            reason: "must be <= 512 chars",
        });
    }
    Ok(())
}

impl Validate for TransactionDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_transaction_source(&self.source)?;
        validate_raw_input_ref(&self.raw_input_ref)?;
        self.record.validate()?;
        if self.record.schema() != PayloadSchema::Receipt {
            return Err(ContractViolation::InvalidValue {
                field: "transaction.record",
                reason: "must hold a receipt payload",
            });
        }
        Ok(())
    }
}

/// A what-if simulation owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSimulation {
    pub id: RecordId,
    pub owner: OwnerId,
    pub query: String,
    pub record: ArbitratedRecord,
    pub outcome: SimulationOutcome,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationDraft {
    pub query: String,
    pub record: ArbitratedRecord,
    pub outcome: SimulationOutcome,
}

impl SimulationDraft {
    pub fn v1(
        query: impl Into<String>,
        record: ArbitratedRecord,
        outcome: SimulationOutcome,
    ) -> Result<Self, ContractViolation> {
        let d = Self {
            query: query.into(),
            record,
            outcome,
        };
        d.validate()?;
        Ok(d)
    }
}

impl Validate for SimulationDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.query.trim().is_empty() || self.query.len() > 2_000 {
            return Err(ContractViolation::InvalidValue {
                field: "simulation.query",
                reason: "must be 1..=2000 chars",
            });
        }
        self.record.validate()?;
        if self.record.schema() != PayloadSchema::SimulationQuery {
            return Err(ContractViolation::InvalidValue {
                field: "simulation.record",
                reason: "must hold a simulation query payload",
            });
        }
        Ok(())
    }
}

/// Owner-scoped list filter. Results are ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: u32,
    pub offset: u32,
    pub created_after: Option<TimestampMs>,
    pub created_before: Option<TimestampMs>,
    pub source: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: LIST_LIMIT_DEFAULT,
            offset: 0,
            created_after: None,
            created_before: None,
            source: None,
        }
    }
}

impl ListQuery {
    pub fn page(limit: u32, offset: u32) -> Self {
        Self {
            limit,
            offset,
            ..Self::default()
        }
    }

    /// True when a record created at `at` with `source` passes the filters.
    pub fn admits(&self, at: TimestampMs, source: Option<&str>) -> bool {
        if let Some(after) = self.created_after {
            if at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if at >= before {
                return false;
            }
        }
        match (&self.source, source) {
            (Some(want), Some(got)) => want.eq_ignore_ascii_case(got),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

impl Validate for ListQuery {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.limit == 0 || self.limit > LIST_LIMIT_MAX {
            return Err(ContractViolation::InvalidRange {
                field: "list_query.limit",
                min: 1.0,
                max: LIST_LIMIT_MAX as f64,
                got: self.limit as f64,
            });
        }
        if let (Some(a), Some(b)) = (self.created_after, self.created_before) {
            if a >= b {
                return Err(ContractViolation::InvalidValue {
                    field: "list_query.created_after",
                    reason: "must be earlier than created_before",
                });
            }
        }
        if let Some(s) = &self.source {
            validate_token("list_query.source", s, 32)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, offset: u32, total: u64) -> Self {
        let has_more = (offset as u64).saturating_add(items.len() as u64) < total;
        Self {
            items,
            total,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_records_01_page_has_more_tracks_window() {
        let p = Page::new(vec![1, 2, 3, 4, 5], 20, 25);
        assert!(!p.has_more);
        let p = Page::new(vec![1; 10], 0, 25);
        assert!(p.has_more);
    }

    #[test]
    fn at_records_02_list_query_limit_bounds() {
        assert!(ListQuery::page(0, 0).validate().is_err());
        assert!(ListQuery::page(101, 0).validate().is_err());
        assert!(ListQuery::page(100, 0).validate().is_ok());
    }

    #[test]
    fn at_records_03_filters_are_half_open_and_case_insensitive() {
        let q = ListQuery {
            created_after: Some(TimestampMs(10)),
            created_before: Some(TimestampMs(20)),
            source: Some("Receipt".to_string()),
            ..ListQuery::default()
        };
        assert!(q.admits(TimestampMs(10), Some("receipt")));
        assert!(!q.admits(TimestampMs(20), Some("receipt")));
        assert!(!q.admits(TimestampMs(15), Some("bill")));
        assert!(!q.admits(TimestampMs(15), None));
    }

    #[test]
    fn at_records_05_transaction_source_is_normalized_and_bounded() {
        use crate::arbitration::DecisionBasis;
        use crate::candidate::{CandidateResult, ConfidenceScore, ExtractionPayload, SourceId};
        use crate::receipt::ReceiptPayload;

        let payload = ExtractionPayload::Receipt(ReceiptPayload::with_total(
            rust_decimal::Decimal::from(12),
        ));
        let confidence = ConfidenceScore::new(80).unwrap();
        let candidate =
            CandidateResult::v1(SourceId::SourceA, payload.clone(), confidence, TimestampMs(1)).unwrap();
        let record = ArbitratedRecord::v1(
            "ab".repeat(32),
            payload,
            DecisionBasis::SingleSourceOnly,
            confidence,
            vec![candidate],
        )
        .unwrap();
        let d = TransactionDraft::v1(" Receipt ", "r.jpg", record.clone()).unwrap();
        assert_eq!(d.source, "receipt");
        assert!(TransactionDraft::v1("x".repeat(33), "r.jpg", record.clone()).is_err());
        assert!(TransactionDraft::v1("bill", "n".repeat(513), record).is_err());
        assert!(validate_transaction_source("   ").is_err());
        assert!(validate_raw_input_ref("").is_ok());
    }

    #[test]
    fn at_records_04_ids_reject_garbage() {
        assert!(OwnerId::new("").is_err());
        assert!(RecordId::new("abc/def").is_err());
        assert!(RecordId::new("0f3a-77").is_ok());
    }
}
