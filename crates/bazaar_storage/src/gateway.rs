#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use bazaar_kernel_contracts::records::{
    ListQuery, OwnerId, Page, PersistedSimulation, PersistedTransaction, RecordId, RecordKind,
    SimulationDraft, TransactionDraft,
};
use bazaar_kernel_contracts::ContractViolation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Transient: the backing store could not be reached. Never retried here.
    #[error("store unavailable: {detail}")]
    StoreUnavailable { detail: String },
    #[error("{} {id} not found", .kind.table())]
    NotFound { kind: RecordKind, id: String },
    #[error("forbidden: {detail}")]
    Forbidden { detail: String },
    #[error("store rejected request (status {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("store returned unreadable data: {detail}")]
    Corrupt { detail: String },
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

impl StoreError {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        StoreError::StoreUnavailable {
            detail: detail.into(),
        }
    }

    pub fn not_found(kind: RecordKind, id: &RecordId) -> Self {
        StoreError::NotFound {
            kind,
            id: id.as_str().to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::StoreUnavailable { .. })
    }
}

/// Per-owner counts for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerStats {
    pub transactions_total: u64,
    pub simulations_total: u64,
    pub transactions_by_source: BTreeMap<String, u64>,
    pub simulations_by_scenario: BTreeMap<String, u64>,
}

/// Typed persistence interface for arbitrated records.
///
/// Every read and delete is scoped to `owner`; a record owned by someone else
/// is reported as `NotFound`. Lists are newest first.
pub trait RecordGateway: Send + Sync {
    fn commit_transaction(
        &self,
        owner: &OwnerId,
        draft: TransactionDraft,
    ) -> Result<RecordId, StoreError>;

    fn commit_simulation(
        &self,
        owner: &OwnerId,
        draft: SimulationDraft,
    ) -> Result<RecordId, StoreError>;

    fn list_transactions(
        &self,
        owner: &OwnerId,
        query: &ListQuery,
    ) -> Result<Page<PersistedTransaction>, StoreError>;

    /// `query.source` filters on the scenario name.
    fn list_simulations(
        &self,
        owner: &OwnerId,
        query: &ListQuery,
    ) -> Result<Page<PersistedSimulation>, StoreError>;

    fn get_transaction(
        &self,
        owner: &OwnerId,
        id: &RecordId,
    ) -> Result<PersistedTransaction, StoreError>;

    fn get_simulation(
        &self,
        owner: &OwnerId,
        id: &RecordId,
    ) -> Result<PersistedSimulation, StoreError>;

    fn delete_transaction(&self, owner: &OwnerId, id: &RecordId) -> Result<(), StoreError>;

    fn delete_simulation(&self, owner: &OwnerId, id: &RecordId) -> Result<(), StoreError>;

    /// Cascade delete of everything the owner holds. Returns the number of rows removed.
    fn delete_owner(&self, owner: &OwnerId) -> Result<u64, StoreError>;

    fn stats(&self, owner: &OwnerId) -> Result<OwnerStats, StoreError>;

    fn ping(&self) -> Result<(), StoreError>;
}

/// 128-bit random hex id.
pub fn new_record_id() -> Result<RecordId, StoreError> {
    Ok(RecordId::new(format!("{:032x}", rand::random::<u128>()))?)
}
