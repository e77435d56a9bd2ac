#![forbid(unsafe_code)]

//! Client-side count of writes that never reached the record store.

use bazaar_kernel_contracts::unsynced::{OperationKind, UnsyncedOperation};
use bazaar_kernel_contracts::TimestampMs;
use bazaar_storage::{KeyValueStore, KvError};
use serde::{Deserialize, Serialize};

pub const OFFLINE_STATE_KEY: &str = "bazaar.offline_reconciliation.v1";

#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("offline state under {key} is unreadable: {source}")]
    Corrupt {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct OfflineState {
    count: u64,
    #[serde(default)]
    pending: Vec<UnsyncedOperation>,
}

/// Durable unsynced-write counter backed by a [`KeyValueStore`].
///
/// Every mutation is written through before it returns, so the count seen
/// after a restart is the count last reported.
#[derive(Debug)]
pub struct OfflineReconciliationCounter<S: KeyValueStore> {
    store: S,
    state: OfflineState,
}

impl<S: KeyValueStore> OfflineReconciliationCounter<S> {
    pub fn load(store: S) -> Result<Self, OfflineError> {
        let mut state = match store.get(OFFLINE_STATE_KEY)? {
            Some(raw) => serde_json::from_str::<OfflineState>(&raw).map_err(|source| {
                OfflineError::Corrupt {
                    key: OFFLINE_STATE_KEY,
                    source,
                }
            })?,
            None => OfflineState::default(),
        };
        let queued = state.pending.len() as u64;
        if state.count < queued {
            tracing::warn!(
                count = state.count,
                queued,
                "offline count below queued entries; raising"
            );
            state.count = queued;
        }
        Ok(Self { store, state })
    }

    pub fn count(&self) -> u64 {
        self.state.count
    }

    pub fn pending(&self) -> &[UnsyncedOperation] {
        &self.state.pending
    }

    pub fn pending_of(&self, kind: OperationKind) -> usize {
        self.state.pending.iter().filter(|op| op.kind == kind).count()
    }

    /// Adds exactly one unsynced operation and persists the new count.
    pub fn record_failure(
        &mut self,
        kind: OperationKind,
        attempted_payload: impl Into<String>,
        failure_reason: impl Into<String>,
    ) -> Result<u64, OfflineError> {
        self.state.pending.push(UnsyncedOperation {
            kind,
            attempted_payload: attempted_payload.into(),
            failure_reason: failure_reason.into(),
            recorded_at: TimestampMs::now(),
        });
        self.state.count = self.state.count.saturating_add(1);
        self.persist()?;
        tracing::info!(kind = kind.as_str(), count = self.state.count, "unsynced write recorded");
        Ok(self.state.count)
    }

    /// Clears every pending entry of `kind`. Returns how many were cleared.
    pub fn record_sync_success(&mut self, kind: OperationKind) -> Result<u64, OfflineError> {
        let before = self.state.pending.len();
        self.state.pending.retain(|op| op.kind != kind);
        let cleared = (before - self.state.pending.len()) as u64;
        if cleared == 0 {
            return Ok(0);
        }
        self.state.count = self.state.count.saturating_sub(cleared);
        self.persist()?;
        tracing::info!(kind = kind.as_str(), cleared, count = self.state.count, "unsynced writes cleared");
        Ok(cleared)
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn persist(&mut self) -> Result<(), OfflineError> {
        let raw = serde_json::to_string(&self.state).map_err(|source| OfflineError::Corrupt {
            key: OFFLINE_STATE_KEY,
            source,
        })?;
        self.store.set(OFFLINE_STATE_KEY, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_storage::{FileKeyValueStore, MemoryKeyValueStore};
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn counter() -> OfflineReconciliationCounter<MemoryKeyValueStore> {
        OfflineReconciliationCounter::load(MemoryKeyValueStore::new()).unwrap()
    }

    #[test]
    fn at_offline_01_failure_increments_by_exactly_one() {
        let mut c = counter();
        assert_eq!(c.count(), 0);
        assert_eq!(
            c.record_failure(OperationKind::ReceiptUpload, "{}", "store unavailable")
                .unwrap(),
            1
        );
        assert_eq!(c.count(), 1);
        c.record_failure(OperationKind::Simulation, "{}", "store unavailable")
            .unwrap();
        assert_eq!(c.count(), 2);
        assert_eq!(c.pending_of(OperationKind::Simulation), 1);
    }

    #[test]
    fn at_offline_02_sync_success_clears_only_its_kind() {
        let mut c = counter();
        c.record_failure(OperationKind::ReceiptUpload, "a", "x").unwrap();
        c.record_failure(OperationKind::ReceiptUpload, "b", "x").unwrap();
        c.record_failure(OperationKind::Simulation, "c", "x").unwrap();

        assert_eq!(c.record_sync_success(OperationKind::ReceiptUpload).unwrap(), 2);
        assert_eq!(c.count(), 1);
        assert_eq!(c.pending()[0].attempted_payload, "c");
        assert_eq!(c.record_sync_success(OperationKind::ReceiptUpload).unwrap(), 0);
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn at_offline_03_count_survives_reload() {
        let mut c = counter();
        c.record_failure(OperationKind::Simulation, "{\"query\":\"q\"}", "timeout")
            .unwrap();
        let store = c.into_store();
        let reloaded = OfflineReconciliationCounter::load(store).unwrap();
        assert_eq!(reloaded.count(), 1);
        assert_eq!(reloaded.pending()[0].failure_reason, "timeout");
    }

    #[test]
    fn at_offline_04_file_backed_counter_persists_across_opens() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(1);
        let base = std::env::temp_dir().join(format!("bazaar-offline-test-{suffix}"));
        fs::create_dir_all(&base).unwrap();
        let path = base.join("state.json");

        let mut c =
            OfflineReconciliationCounter::load(FileKeyValueStore::open(&path).unwrap()).unwrap();
        c.record_failure(OperationKind::ReceiptUpload, "r.jpg", "store unavailable")
            .unwrap();
        drop(c);

        let c =
            OfflineReconciliationCounter::load(FileKeyValueStore::open(&path).unwrap()).unwrap();
        assert_eq!(c.count(), 1);
        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn at_offline_05_corrupt_state_is_reported() {
        let mut store = MemoryKeyValueStore::new();
        store.set(OFFLINE_STATE_KEY, "not json".to_string()).unwrap();
        assert!(matches!(
            OfflineReconciliationCounter::load(store),
            Err(OfflineError::Corrupt { .. })
        ));
    }
}
