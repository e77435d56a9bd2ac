#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use bazaar_kernel_contracts::arbitration::ArbitratedRecord;
use bazaar_kernel_contracts::records::{
    ListQuery, OwnerId, Page, PersistedSimulation, PersistedTransaction, RecordId, RecordKind,
    SimulationDraft, TransactionDraft,
};
use bazaar_kernel_contracts::simulation::SimulationOutcome;
use bazaar_kernel_contracts::{TimestampMs, Validate};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use crate::gateway::{new_record_id, OwnerStats, RecordGateway, StoreError};

pub const STORE_TIMEOUT_MS_DEFAULT: u32 = 10_000;
const ERROR_BODY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgrestConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    pub service_key: String,
    pub timeout_ms: u32,
}

impl PostgrestConfig {
    /// `SUPABASE_URL` and `SUPABASE_SERVICE_ROLE_KEY`; `None` when either is unset.
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("SUPABASE_URL").ok().filter(|v| !v.trim().is_empty())?;
        let service_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let timeout_ms = env::var("BAZAAR_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| (100..=120_000).contains(v))
            .unwrap_or(STORE_TIMEOUT_MS_DEFAULT);
        Some(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            service_key: service_key.trim().to_string(),
            timeout_ms,
        })
    }

    fn table_url(&self, kind: RecordKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, kind.table())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TransactionRow {
    id: RecordId,
    user_id: OwnerId,
    source: String,
    raw_input_ref: String,
    record: ArbitratedRecord,
    created_at: TimestampMs,
    updated_at: TimestampMs,
}

impl From<TransactionRow> for PersistedTransaction {
    fn from(r: TransactionRow) -> Self {
        PersistedTransaction {
            id: r.id,
            owner: r.user_id,
            source: r.source,
            raw_input_ref: r.raw_input_ref,
            record: r.record,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SimulationRow {
    id: RecordId,
    user_id: OwnerId,
    query: String,
    /// Denormalized from `outcome` so lists and stats can filter on it.
    scenario: String,
    record: ArbitratedRecord,
    outcome: SimulationOutcome,
    created_at: TimestampMs,
    updated_at: TimestampMs,
}

impl From<SimulationRow> for PersistedSimulation {
    fn from(r: SimulationRow) -> Self {
        PersistedSimulation {
            id: r.id,
            owner: r.user_id,
            query: r.query,
            record: r.record,
            outcome: r.outcome,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourceOnly {
    source: String,
}

#[derive(Debug, Deserialize)]
struct ScenarioOnly {
    scenario: String,
}

/// Supabase PostgREST tables `transactions` and `simulations`, accessed with
/// the service-role key. Owner scoping is enforced by the `user_id` filter on
/// every request.
#[derive(Debug, Clone)]
pub struct PostgrestRecordStore {
    config: PostgrestConfig,
    agent: ureq::Agent,
}

impl PostgrestRecordStore {
    pub fn new(config: PostgrestConfig) -> Self {
        let timeout = Duration::from_millis(u64::from(config.timeout_ms.max(100)));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { config, agent }
    }

    fn request(&self, method: &str, kind: RecordKind) -> ureq::Request {
        self.agent
            .request(method, &self.config.table_url(kind))
            .set("apikey", &self.config.service_key)
            .set("Authorization", &format!("Bearer {}", self.config.service_key))
            .set("Accept", "application/json")
    }

    fn insert<T: Serialize>(&self, kind: RecordKind, row: &T) -> Result<(), StoreError> {
        self.request("POST", kind)
            .set("Prefer", "return=minimal")
            .send_json(row)
            .map_err(store_error_from_ureq)?;
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(&self, req: ureq::Request) -> Result<Vec<T>, StoreError> {
        let resp = req.call().map_err(store_error_from_ureq)?;
        resp.into_json::<Vec<T>>().map_err(|e| StoreError::Corrupt {
            detail: e.to_string(),
        })
    }

    fn fetch_page<T: DeserializeOwned>(
        &self,
        req: ureq::Request,
        query: &ListQuery,
    ) -> Result<(Vec<T>, u64), StoreError> {
        let req = req
            .set("Prefer", "count=exact")
            .query("order", "created_at.desc,id.desc")
            .query("limit", &query.limit.to_string())
            .query("offset", &query.offset.to_string());
        let req = match query.created_after {
            Some(after) => req.query("created_at", &format!("gte.{}", after.0)),
            None => req,
        };
        let req = match query.created_before {
            Some(before) => req.query("created_at", &format!("lt.{}", before.0)),
            None => req,
        };
        let resp = match req.call() {
            Ok(resp) => resp,
            Err(e) => return past_end_total(e).map(|total| (Vec::new(), total)),
        };
        let range_total = resp.header("Content-Range").and_then(parse_content_range_total);
        let rows = resp.into_json::<Vec<T>>().map_err(|e| StoreError::Corrupt {
            detail: e.to_string(),
        })?;
        let total = range_total.unwrap_or(u64::from(query.offset) + rows.len() as u64);
        Ok((rows, total))
    }

    fn delete_scoped(
        &self,
        kind: RecordKind,
        owner: &OwnerId,
        id: Option<&RecordId>,
    ) -> Result<u64, StoreError> {
        let mut req = self
            .request("DELETE", kind)
            .set("Prefer", "return=representation")
            .query("select", "id")
            .query("user_id", &format!("eq.{}", owner.as_str()));
        if let Some(id) = id {
            req = req.query("id", &format!("eq.{}", id.as_str()));
        }
        let removed: Vec<IgnoredAny> = self.fetch(req)?;
        Ok(removed.len() as u64)
    }

    fn get_scoped<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        owner: &OwnerId,
        id: &RecordId,
    ) -> Result<T, StoreError> {
        let req = self
            .request("GET", kind)
            .query("id", &format!("eq.{}", id.as_str()))
            .query("user_id", &format!("eq.{}", owner.as_str()))
            .query("limit", "1");
        self.fetch::<T>(req)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(kind, id))
    }
}

impl RecordGateway for PostgrestRecordStore {
    fn commit_transaction(
        &self,
        owner: &OwnerId,
        draft: TransactionDraft,
    ) -> Result<RecordId, StoreError> {
        draft.validate()?;
        let id = new_record_id()?;
        let now = TimestampMs::now();
        let row = TransactionRow {
            id: id.clone(),
            user_id: owner.clone(),
            source: draft.source,
            raw_input_ref: draft.raw_input_ref,
            record: draft.record,
            created_at: now,
            updated_at: now,
        };
        self.insert(RecordKind::Transaction, &row)?;
        tracing::debug!(owner = owner.as_str(), record_id = id.as_str(), "transaction row inserted");
        Ok(id)
    }

    fn commit_simulation(
        &self,
        owner: &OwnerId,
        draft: SimulationDraft,
    ) -> Result<RecordId, StoreError> {
        draft.validate()?;
        let id = new_record_id()?;
        let now = TimestampMs::now();
        let row = SimulationRow {
            id: id.clone(),
            user_id: owner.clone(),
            query: draft.query,
            scenario: draft.outcome.scenario.as_str().to_string(),
            record: draft.record,
            outcome: draft.outcome,
            created_at: now,
            updated_at: now,
        };
        self.insert(RecordKind::Simulation, &row)?;
        tracing::debug!(owner = owner.as_str(), record_id = id.as_str(), "simulation row inserted");
        Ok(id)
    }

    fn list_transactions(
        &self,
        owner: &OwnerId,
        query: &ListQuery,
    ) -> Result<Page<PersistedTransaction>, StoreError> {
        query.validate()?;
        let mut req = self
            .request("GET", RecordKind::Transaction)
            .query("user_id", &format!("eq.{}", owner.as_str()));
        if let Some(source) = &query.source {
            req = req.query("source", &label_filter(source));
        }
        let (rows, total) = self.fetch_page::<TransactionRow>(req, query)?;
        Ok(Page::new(
            rows.into_iter().map(Into::into).collect(),
            query.offset,
            total,
        ))
    }

    fn list_simulations(
        &self,
        owner: &OwnerId,
        query: &ListQuery,
    ) -> Result<Page<PersistedSimulation>, StoreError> {
        query.validate()?;
        let mut req = self
            .request("GET", RecordKind::Simulation)
            .query("user_id", &format!("eq.{}", owner.as_str()));
        if let Some(scenario) = &query.source {
            req = req.query("scenario", &label_filter(scenario));
        }
        let (rows, total) = self.fetch_page::<SimulationRow>(req, query)?;
        Ok(Page::new(
            rows.into_iter().map(Into::into).collect(),
            query.offset,
            total,
        ))
    }

    fn get_transaction(
        &self,
        owner: &OwnerId,
        id: &RecordId,
    ) -> Result<PersistedTransaction, StoreError> {
        self.get_scoped::<TransactionRow>(RecordKind::Transaction, owner, id)
            .map(Into::into)
    }

    fn get_simulation(
        &self,
        owner: &OwnerId,
        id: &RecordId,
    ) -> Result<PersistedSimulation, StoreError> {
        self.get_scoped::<SimulationRow>(RecordKind::Simulation, owner, id)
            .map(Into::into)
    }

    fn delete_transaction(&self, owner: &OwnerId, id: &RecordId) -> Result<(), StoreError> {
        match self.delete_scoped(RecordKind::Transaction, owner, Some(id))? {
            0 => Err(StoreError::not_found(RecordKind::Transaction, id)),
            _ => Ok(()),
        }
    }

    fn delete_simulation(&self, owner: &OwnerId, id: &RecordId) -> Result<(), StoreError> {
        match self.delete_scoped(RecordKind::Simulation, owner, Some(id))? {
            0 => Err(StoreError::not_found(RecordKind::Simulation, id)),
            _ => Ok(()),
        }
    }

    fn delete_owner(&self, owner: &OwnerId) -> Result<u64, StoreError> {
        let tx = self.delete_scoped(RecordKind::Transaction, owner, None)?;
        let sims = self.delete_scoped(RecordKind::Simulation, owner, None)?;
        Ok(tx + sims)
    }

    fn stats(&self, owner: &OwnerId) -> Result<OwnerStats, StoreError> {
        let owner_filter = format!("eq.{}", owner.as_str());
        let sources: Vec<SourceOnly> = self.fetch(
            self.request("GET", RecordKind::Transaction)
                .query("select", "source")
                .query("user_id", &owner_filter),
        )?;
        let scenarios: Vec<ScenarioOnly> = self.fetch(
            self.request("GET", RecordKind::Simulation)
                .query("select", "scenario")
                .query("user_id", &owner_filter),
        )?;
        let mut stats = OwnerStats {
            transactions_total: sources.len() as u64,
            simulations_total: scenarios.len() as u64,
            ..OwnerStats::default()
        };
        for s in sources {
            *stats
                .transactions_by_source
                .entry(s.source.to_ascii_lowercase())
                .or_default() += 1;
        }
        for s in scenarios {
            *stats.simulations_by_scenario.entry(s.scenario).or_default() += 1;
        }
        Ok(stats)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let _: Vec<IgnoredAny> = self.fetch(
            self.request("GET", RecordKind::Transaction)
                .query("select", "id")
                .query("limit", "1"),
        )?;
        Ok(())
    }
}

/// Transport failures and 5xx are transient; auth failures are `Forbidden`;
/// any other status is a rejection.
pub fn store_error_from_ureq(err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, resp) if status >= 500 => {
            StoreError::unavailable(format!("store returned status {status}: {}", body_excerpt(resp)))
        }
        ureq::Error::Status(status @ (401 | 403), resp) => StoreError::Forbidden {
            detail: format!("status {status}: {}", body_excerpt(resp)),
        },
        ureq::Error::Status(status, resp) => StoreError::Rejected {
            status,
            detail: body_excerpt(resp),
        },
        ureq::Error::Transport(t) => StoreError::unavailable(format!("{:?}: {}", t.kind(), t)),
    }
}

fn body_excerpt(resp: ureq::Response) -> String {
    resp.into_string()
        .unwrap_or_default()
        .chars()
        .take(ERROR_BODY_MAX_CHARS)
        .collect()
}

/// PostgREST answers 416 when `offset` is past the last row. That is an empty
/// page; the total still comes from `Content-Range: */N`.
pub fn past_end_total(err: ureq::Error) -> Result<u64, StoreError> {
    match err {
        ureq::Error::Status(416, resp) => Ok(resp
            .header("Content-Range")
            .and_then(parse_content_range_total)
            .unwrap_or(0)),
        other => Err(store_error_from_ureq(other)),
    }
}

/// Labels are stored lowercased, so filters are exact matches. `ilike` would
/// treat `%` and `_` in a label as wildcards.
fn label_filter(label: &str) -> String {
    format!("eq.{}", label.trim().to_ascii_lowercase())
}

/// `0-9/25` → 25, `*/0` → 0. `*` totals are unknown.
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}
