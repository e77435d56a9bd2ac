#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use bazaar_engines::arbitration::{ArbitrationEngine, ArbitrationError, ArbitrationRequest};
use bazaar_engines::extraction::{ExtractionSource, RawInput, IMAGE_MAX_BYTES, SOURCE_TIMEOUT_MS_DEFAULT};
use bazaar_engines::simulation::simulate;
use bazaar_kernel_contracts::arbitration::ArbitratedRecord;
use bazaar_kernel_contracts::candidate::{CandidateResult, PayloadSchema};
use bazaar_kernel_contracts::records::{
    validate_raw_input_ref, validate_transaction_source, OwnerId, RecordId, SimulationDraft,
    TransactionDraft,
};
use bazaar_kernel_contracts::simulation::SimulationOutcome;
use bazaar_kernel_contracts::{ContractViolation, TimestampMs, Validate};
use bazaar_storage::{RecordGateway, StoreError};
use serde::Serialize;

pub const SOURCE_TIMEOUT_MS_MIN: u32 = 100;
pub const SOURCE_TIMEOUT_MS_MAX: u32 = 120_000;
pub const QUERY_MIN_CHARS: usize = 10;
pub const QUERY_MAX_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngressConfig {
    /// Shared deadline for all sources of one request.
    pub source_timeout_ms: u32,
}

impl IngressConfig {
    pub fn mvp_v1() -> Self {
        Self {
            source_timeout_ms: SOURCE_TIMEOUT_MS_DEFAULT,
        }
    }
}

impl Validate for IngressConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !(SOURCE_TIMEOUT_MS_MIN..=SOURCE_TIMEOUT_MS_MAX).contains(&self.source_timeout_ms) {
            return Err(ContractViolation::InvalidRange {
                field: "ingress_config.source_timeout_ms",
                min: SOURCE_TIMEOUT_MS_MIN as f64,
                max: SOURCE_TIMEOUT_MS_MAX as f64,
                got: self.source_timeout_ms as f64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    NoUsableResult(ArbitrationError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("internal pipeline error: {0}")]
    Internal(String),
}

impl From<ArbitrationError> for IngressError {
    fn from(e: ArbitrationError) -> Self {
        match e {
            ArbitrationError::NoUsableResult { .. } => IngressError::NoUsableResult(e),
            ArbitrationError::InvalidRequest(v) => IngressError::Internal(v.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiptIngressRequest {
    pub owner: OwnerId,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub hint_text: Option<String>,
    /// Client label stored with the transaction (`image`, `receipt`, `bill`, ...).
    pub source_label: String,
    pub file_name: String,
}

impl ReceiptIngressRequest {
    pub fn v1(
        owner: OwnerId,
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        hint_text: Option<String>,
        source_label: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Result<Self, IngressError> {
        let r = Self {
            owner,
            bytes,
            mime_type: mime_type.into(),
            hint_text: hint_text.filter(|h| !h.trim().is_empty()),
            source_label: source_label.into(),
            file_name: file_name.into(),
        };
        if r.bytes.is_empty() {
            return Err(IngressError::InvalidInput("file is empty".to_string()));
        }
        if r.bytes.len() > IMAGE_MAX_BYTES {
            return Err(IngressError::InvalidInput(format!(
                "file exceeds {IMAGE_MAX_BYTES} bytes"
            )));
        }
        if !(r.mime_type.starts_with("image/") || r.mime_type == "text/plain") {
            return Err(IngressError::InvalidInput(format!(
                "unsupported content type {}",
                r.mime_type
            )));
        }
        validate_transaction_source(&r.source_label)
            .and_then(|()| validate_raw_input_ref(&r.file_name))
            .map_err(|v| IngressError::InvalidInput(v.to_string()))?;
        Ok(r)
    }
}

#[derive(Debug, Clone)]
pub struct SimulationIngressRequest {
    pub owner: OwnerId,
    pub query: String,
}

impl SimulationIngressRequest {
    pub fn v1(owner: OwnerId, query: impl Into<String>) -> Result<Self, IngressError> {
        let query = query.into().trim().to_string();
        let chars = query.chars().count();
        if chars < QUERY_MIN_CHARS {
            return Err(IngressError::InvalidInput(format!(
                "query must be at least {QUERY_MIN_CHARS} characters"
            )));
        }
        if chars > QUERY_MAX_CHARS {
            return Err(IngressError::InvalidInput(format!(
                "query must be at most {QUERY_MAX_CHARS} characters"
            )));
        }
        Ok(Self { owner, query })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptIngressOutcome {
    pub record: ArbitratedRecord,
    /// False when the store was unreachable; the client should count it as unsynced.
    pub synced: bool,
    pub record_id: Option<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationIngressOutcome {
    pub record: ArbitratedRecord,
    pub outcome: SimulationOutcome,
    pub synced: bool,
    pub record_id: Option<RecordId>,
}

/// Dual-source interpretation, arbitration and commit for one request.
pub struct AppIngressRuntime {
    sources: Vec<Arc<dyn ExtractionSource>>,
    engine: ArbitrationEngine,
    gateway: Arc<dyn RecordGateway>,
    config: IngressConfig,
}

impl AppIngressRuntime {
    pub fn new(
        sources: Vec<Arc<dyn ExtractionSource>>,
        engine: ArbitrationEngine,
        gateway: Arc<dyn RecordGateway>,
        config: IngressConfig,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        if sources.is_empty() || sources.len() > 2 {
            return Err(ContractViolation::InvalidValue {
                field: "app_ingress.sources",
                reason: "must configure one or two sources",
            });
        }
        if sources.iter().any(|s| !s.source_id().is_remote())
            || (sources.len() == 2 && sources[0].source_id() == sources[1].source_id())
        {
            return Err(ContractViolation::InvalidValue {
                field: "app_ingress.sources",
                reason: "sources must be distinct remote sources",
            });
        }
        Ok(Self {
            sources,
            engine,
            gateway,
            config,
        })
    }

    pub fn gateway(&self) -> Arc<dyn RecordGateway> {
        Arc::clone(&self.gateway)
    }

    /// Runs every source on the blocking pool under one shared deadline.
    /// Failed or late sources are dropped, never fatal.
    pub async fn collect_candidates(
        &self,
        input: Arc<RawInput>,
        schema: PayloadSchema,
    ) -> Vec<CandidateResult> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(u64::from(self.config.source_timeout_ms));
        let handles: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let input = Arc::clone(&input);
                let id = source.source_id();
                (id, tokio::task::spawn_blocking(move || source.extract(&input, schema)))
            })
            .collect();

        let mut candidates = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(candidate))) if candidate.source_id() == id => candidates.push(candidate),
                Ok(Ok(Ok(_))) => {
                    tracing::warn!(source = id.as_str(), "candidate carried a foreign source id");
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(source = id.as_str(), error = %e, "source failed");
                }
                Ok(Err(join)) => {
                    tracing::error!(source = id.as_str(), error = %join, "source task aborted");
                }
                Err(_) => {
                    tracing::warn!(
                        source = id.as_str(),
                        timeout_ms = self.config.source_timeout_ms,
                        "source exceeded deadline"
                    );
                }
            }
        }
        candidates
    }

    pub async fn interpret(
        &self,
        input: RawInput,
        schema: PayloadSchema,
    ) -> Result<ArbitratedRecord, IngressError> {
        let input = Arc::new(input);
        let candidates = self.collect_candidates(Arc::clone(&input), schema).await;
        let req = ArbitrationRequest {
            schema,
            input_digest: input.digest(),
            candidates,
            fallback_text: input.fallback_text().map(|t| t.into_owned()),
            requested_at: TimestampMs::now(),
        };
        let record = self.engine.arbitrate(&req)?;
        tracing::info!(
            schema = schema.as_str(),
            decision = record.decision_basis().as_str(),
            confidence = record.confidence().value(),
            "input arbitrated"
        );
        Ok(record)
    }

    pub async fn ingest_receipt(
        &self,
        req: ReceiptIngressRequest,
    ) -> Result<ReceiptIngressOutcome, IngressError> {
        let input = RawInput::Image {
            bytes: req.bytes,
            mime_type: req.mime_type,
            hint_text: req.hint_text,
        };
        let record = self.interpret(input, PayloadSchema::Receipt).await?;
        let draft = TransactionDraft::v1(req.source_label, req.file_name, record.clone())
            .map_err(|v| IngressError::InvalidInput(v.to_string()))?;
        let gateway = Arc::clone(&self.gateway);
        let owner = req.owner.clone();
        let committed =
            tokio::task::spawn_blocking(move || gateway.commit_transaction(&owner, draft)).await;
        let record_id = absorb_unavailable(&req.owner, "transaction", committed)?;
        Ok(ReceiptIngressOutcome {
            record,
            synced: record_id.is_some(),
            record_id,
        })
    }

    pub async fn ingest_simulation(
        &self,
        req: SimulationIngressRequest,
    ) -> Result<SimulationIngressOutcome, IngressError> {
        let input = RawInput::Query {
            text: req.query.clone(),
        };
        let record = self.interpret(input, PayloadSchema::SimulationQuery).await?;
        let Some(query) = record.final_payload().as_simulation_query() else {
            return Err(IngressError::Internal(
                "arbitrated record is not a simulation query".to_string(),
            ));
        };
        let outcome = simulate(query, record.confidence());
        let draft = SimulationDraft::v1(req.query, record.clone(), outcome.clone())
            .map_err(|v| IngressError::InvalidInput(v.to_string()))?;
        let gateway = Arc::clone(&self.gateway);
        let owner = req.owner.clone();
        let committed =
            tokio::task::spawn_blocking(move || gateway.commit_simulation(&owner, draft)).await;
        let record_id = absorb_unavailable(&req.owner, "simulation", committed)?;
        Ok(SimulationIngressOutcome {
            record,
            outcome,
            synced: record_id.is_some(),
            record_id,
        })
    }
}

/// `StoreUnavailable` becomes "not synced"; every other store failure is surfaced.
fn absorb_unavailable(
    owner: &OwnerId,
    kind: &'static str,
    committed: Result<Result<RecordId, StoreError>, tokio::task::JoinError>,
) -> Result<Option<RecordId>, IngressError> {
    match committed {
        Ok(Ok(id)) => {
            tracing::info!(owner = owner.as_str(), kind, record_id = id.as_str(), "record committed");
            Ok(Some(id))
        }
        Ok(Err(StoreError::StoreUnavailable { detail })) => {
            tracing::warn!(owner = owner.as_str(), kind, %detail, "store unavailable, result returned unsynced");
            Ok(None)
        }
        Ok(Err(e)) => Err(IngressError::Store(e)),
        Err(join) => Err(IngressError::Internal(format!("commit task failed: {join}"))),
    }
}
