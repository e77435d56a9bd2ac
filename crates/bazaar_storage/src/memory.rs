#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use bazaar_kernel_contracts::records::{
    ListQuery, OwnerId, Page, PersistedSimulation, PersistedTransaction, RecordId, RecordKind,
    SimulationDraft, TransactionDraft,
};
use bazaar_kernel_contracts::{TimestampMs, Validate};

use crate::gateway::{new_record_id, OwnerStats, RecordGateway, StoreError};

type Clock = Box<dyn Fn() -> TimestampMs + Send + Sync>;

#[derive(Debug, Default)]
struct Tables {
    next_seq: u64,
    transactions: BTreeMap<RecordId, (u64, PersistedTransaction)>,
    simulations: BTreeMap<RecordId, (u64, PersistedSimulation)>,
}

/// In-process store. The availability switch simulates a connectivity outage.
pub struct InMemoryRecordStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
    clock: Clock,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("available", &self.available.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl InMemoryRecordStore {
    pub fn new_in_memory() -> Self {
        Self::with_clock(Box::new(TimestampMs::now))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            clock,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn open(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store switched offline"));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::unavailable("in-memory store lock poisoned"))
    }
}

/// Owner rows matching `query`, newest first, cut to the requested window.
fn page_of<T: Clone>(
    rows: impl Iterator<Item = (u64, TimestampMs, Option<String>, T)>,
    query: &ListQuery,
) -> Page<T> {
    let mut matched: Vec<(u64, TimestampMs, T)> = rows
        .filter(|(_, at, label, _)| query.admits(*at, label.as_deref()))
        .map(|(seq, at, _, row)| (seq, at, row))
        .collect();
    matched.sort_by(|a, b| (b.1, b.0).cmp(&(a.1, a.0)));
    let total = matched.len() as u64;
    let items = matched
        .into_iter()
        .skip(query.offset as usize)
        .take(query.limit as usize)
        .map(|(_, _, row)| row)
        .collect();
    Page::new(items, query.offset, total)
}

impl RecordGateway for InMemoryRecordStore {
    fn commit_transaction(
        &self,
        owner: &OwnerId,
        draft: TransactionDraft,
    ) -> Result<RecordId, StoreError> {
        draft.validate()?;
        let mut t = self.open()?;
        let id = new_record_id()?;
        let now = (self.clock)();
        t.next_seq += 1;
        let seq = t.next_seq;
        t.transactions.insert(
            id.clone(),
            (
                seq,
                PersistedTransaction {
                    id: id.clone(),
                    owner: owner.clone(),
                    source: draft.source,
                    raw_input_ref: draft.raw_input_ref,
                    record: draft.record,
                    created_at: now,
                    updated_at: now,
                },
            ),
        );
        Ok(id)
    }

    fn commit_simulation(
        &self,
        owner: &OwnerId,
        draft: SimulationDraft,
    ) -> Result<RecordId, StoreError> {
        draft.validate()?;
        let mut t = self.open()?;
        let id = new_record_id()?;
        let now = (self.clock)();
        t.next_seq += 1;
        let seq = t.next_seq;
        t.simulations.insert(
            id.clone(),
            (
                seq,
                PersistedSimulation {
                    id: id.clone(),
                    owner: owner.clone(),
                    query: draft.query,
                    record: draft.record,
                    outcome: draft.outcome,
                    created_at: now,
                    updated_at: now,
                },
            ),
        );
        Ok(id)
    }

    fn list_transactions(
        &self,
        owner: &OwnerId,
        query: &ListQuery,
    ) -> Result<Page<PersistedTransaction>, StoreError> {
        query.validate()?;
        let t = self.open()?;
        let rows = t
            .transactions
            .values()
            .filter(|(_, r)| &r.owner == owner)
            .map(|(seq, r)| (*seq, r.created_at, Some(r.source.clone()), r.clone()));
        Ok(page_of(rows, query))
    }

    fn list_simulations(
        &self,
        owner: &OwnerId,
        query: &ListQuery,
    ) -> Result<Page<PersistedSimulation>, StoreError> {
        query.validate()?;
        let t = self.open()?;
        let rows = t
            .simulations
            .values()
            .filter(|(_, r)| &r.owner == owner)
            .map(|(seq, r)| {
                (
                    *seq,
                    r.created_at,
                    Some(r.outcome.scenario.as_str().to_string()),
                    r.clone(),
                )
            });
        Ok(page_of(rows, query))
    }

    fn get_transaction(
        &self,
        owner: &OwnerId,
        id: &RecordId,
    ) -> Result<PersistedTransaction, StoreError> {
        let t = self.open()?;
        match t.transactions.get(id) {
            Some((_, r)) if &r.owner == owner => Ok(r.clone()),
            _ => Err(StoreError::not_found(RecordKind::Transaction, id)),
        }
    }

    fn get_simulation(
        &self,
        owner: &OwnerId,
        id: &RecordId,
    ) -> Result<PersistedSimulation, StoreError> {
        let t = self.open()?;
        match t.simulations.get(id) {
            Some((_, r)) if &r.owner == owner => Ok(r.clone()),
            _ => Err(StoreError::not_found(RecordKind::Simulation, id)),
        }
    }

    fn delete_transaction(&self, owner: &OwnerId, id: &RecordId) -> Result<(), StoreError> {
        let mut t = self.open()?;
        let owned = matches!(t.transactions.get(id), Some((_, r)) if &r.owner == owner);
        if !owned {
            return Err(StoreError::not_found(RecordKind::Transaction, id));
        }
        t.transactions.remove(id);
        Ok(())
    }

    fn delete_simulation(&self, owner: &OwnerId, id: &RecordId) -> Result<(), StoreError> {
        let mut t = self.open()?;
        let owned = matches!(t.simulations.get(id), Some((_, r)) if &r.owner == owner);
        if !owned {
            return Err(StoreError::not_found(RecordKind::Simulation, id));
        }
        t.simulations.remove(id);
        Ok(())
    }

    fn delete_owner(&self, owner: &OwnerId) -> Result<u64, StoreError> {
        let mut t = self.open()?;
        let before = t.transactions.len() + t.simulations.len();
        t.transactions.retain(|_, (_, r)| &r.owner != owner);
        t.simulations.retain(|_, (_, r)| &r.owner != owner);
        Ok((before - t.transactions.len() - t.simulations.len()) as u64)
    }

    fn stats(&self, owner: &OwnerId) -> Result<OwnerStats, StoreError> {
        let t = self.open()?;
        let mut stats = OwnerStats::default();
        for (_, r) in t.transactions.values().filter(|(_, r)| &r.owner == owner) {
            stats.transactions_total += 1;
            *stats
                .transactions_by_source
                .entry(r.source.to_ascii_lowercase())
                .or_default() += 1;
        }
        for (_, r) in t.simulations.values().filter(|(_, r)| &r.owner == owner) {
            stats.simulations_total += 1;
            *stats
                .simulations_by_scenario
                .entry(r.outcome.scenario.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.open().map(|_| ())
    }
}
