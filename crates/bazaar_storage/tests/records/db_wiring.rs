#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bazaar_engines::simulation::simulate;
use bazaar_kernel_contracts::arbitration::{ArbitratedRecord, DecisionBasis};
use bazaar_kernel_contracts::candidate::{
    CandidateResult, ConfidenceScore, ExtractionPayload, SourceId,
};
use bazaar_kernel_contracts::receipt::ReceiptPayload;
use bazaar_kernel_contracts::records::{
    ListQuery, OwnerId, RecordKind, SimulationDraft, TransactionDraft,
};
use bazaar_kernel_contracts::simquery::{SimulationQueryPayload, SimulationScenario};
use bazaar_kernel_contracts::TimestampMs;
use bazaar_storage::{InMemoryRecordStore, RecordGateway, StoreError};
use rust_decimal::Decimal;

const DIGEST: &str = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

fn owner(id: &str) -> OwnerId {
    OwnerId::new(id).unwrap()
}

/// Clock that advances one second per call, starting at 1_000.
fn stepping_store() -> InMemoryRecordStore {
    let now = Arc::new(AtomicU64::new(1_000));
    InMemoryRecordStore::with_clock(Box::new(move || {
        TimestampMs(now.fetch_add(1_000, Ordering::SeqCst))
    }))
}

fn receipt_record(total: i64) -> ArbitratedRecord {
    let payload = ExtractionPayload::Receipt(ReceiptPayload::with_total(Decimal::from(total)));
    let candidate = CandidateResult::v1(
        SourceId::SourceA,
        payload.clone(),
        ConfidenceScore::new(80).unwrap(),
        TimestampMs(1),
    )
    .unwrap();
    ArbitratedRecord::v1(
        DIGEST.to_string(),
        payload,
        DecisionBasis::SingleSourceOnly,
        ConfidenceScore::new(80).unwrap(),
        vec![candidate],
    )
    .unwrap()
}

fn transaction(source: &str, total: i64) -> TransactionDraft {
    TransactionDraft::v1(source, "bill.jpg", receipt_record(total)).unwrap()
}

fn simulation(scenario: SimulationScenario) -> SimulationDraft {
    let query = SimulationQueryPayload::v1(scenario, "rice", Decimal::from(5), None).unwrap();
    let payload = ExtractionPayload::SimulationQuery(query.clone());
    let candidate = CandidateResult::v1(
        SourceId::SourceB,
        payload.clone(),
        ConfidenceScore::new(70).unwrap(),
        TimestampMs(1),
    )
    .unwrap();
    let record = ArbitratedRecord::v1(
        DIGEST.to_string(),
        payload,
        DecisionBasis::SingleSourceOnly,
        ConfidenceScore::new(70).unwrap(),
        vec![candidate],
    )
    .unwrap();
    let outcome = simulate(&query, record.confidence());
    SimulationDraft::v1("what if I raise rice by 5%", record, outcome).unwrap()
}

#[test]
fn at_records_db_01_reads_are_owner_scoped() {
    let s = InMemoryRecordStore::new_in_memory();
    let id = s.commit_transaction(&owner("alice"), transaction("receipt", 105)).unwrap();

    let got = s.get_transaction(&owner("alice"), &id).unwrap();
    assert_eq!(got.owner, owner("alice"));
    assert_eq!(got.record.decision_basis(), DecisionBasis::SingleSourceOnly);

    let err = s.get_transaction(&owner("bob"), &id).unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotFound {
            kind: RecordKind::Transaction,
            ..
        }
    ));
    assert_eq!(
        s.list_transactions(&owner("bob"), &ListQuery::default())
            .unwrap()
            .total,
        0
    );
}

#[test]
fn at_records_db_02_pages_are_newest_first() {
    let s = stepping_store();
    for i in 0..25 {
        s.commit_transaction(&owner("alice"), transaction("image", 100 + i))
            .unwrap();
    }
    let page = s
        .list_transactions(&owner("alice"), &ListQuery::page(10, 20))
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.total, 25);
    assert!(!page.has_more);

    let first = s
        .list_transactions(&owner("alice"), &ListQuery::page(10, 0))
        .unwrap();
    assert!(first.has_more);
    assert!(first.items[0].created_at > first.items[1].created_at);
    assert_eq!(
        first.items[0]
            .record
            .final_payload()
            .as_receipt()
            .unwrap()
            .total,
        Some(Decimal::from(124))
    );
}

#[test]
fn at_records_db_03_outage_is_distinguishable() {
    let s = InMemoryRecordStore::new_in_memory();
    s.set_available(false);
    let err = s
        .commit_transaction(&owner("alice"), transaction("receipt", 10))
        .unwrap_err();
    assert!(err.is_unavailable());
    assert!(s.ping().is_err());

    s.set_available(true);
    assert!(s.ping().is_ok());
    assert!(s
        .commit_transaction(&owner("alice"), transaction("receipt", 10))
        .is_ok());
}

#[test]
fn at_records_db_04_deletes_are_scoped_and_cascade() {
    let s = InMemoryRecordStore::new_in_memory();
    let a = s.commit_transaction(&owner("alice"), transaction("bill", 1)).unwrap();
    s.commit_simulation(&owner("alice"), simulation(SimulationScenario::IncreasePrice))
        .unwrap();
    let b = s.commit_transaction(&owner("bob"), transaction("bill", 2)).unwrap();

    assert!(matches!(
        s.delete_transaction(&owner("bob"), &a),
        Err(StoreError::NotFound { .. })
    ));
    s.delete_transaction(&owner("bob"), &b).unwrap();
    assert!(s.get_transaction(&owner("bob"), &b).is_err());

    assert_eq!(s.delete_owner(&owner("alice")).unwrap(), 2);
    assert!(s.get_transaction(&owner("alice"), &a).is_err());
}

#[test]
fn at_records_db_05_time_and_source_filters() {
    let s = stepping_store();
    s.commit_transaction(&owner("alice"), transaction("image", 1)).unwrap(); // 1_000
    s.commit_transaction(&owner("alice"), transaction("Receipt", 2)).unwrap(); // 2_000
    s.commit_transaction(&owner("alice"), transaction("image", 3)).unwrap(); // 3_000

    let window = ListQuery {
        created_after: Some(TimestampMs(2_000)),
        created_before: Some(TimestampMs(3_000)),
        ..ListQuery::default()
    };
    let page = s.list_transactions(&owner("alice"), &window).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].source, "receipt");

    let by_source = ListQuery {
        source: Some("IMAGE".to_string()),
        ..ListQuery::default()
    };
    assert_eq!(
        s.list_transactions(&owner("alice"), &by_source).unwrap().total,
        2
    );
    assert!(s
        .list_transactions(&owner("alice"), &ListQuery::page(0, 0))
        .is_err());
}

#[test]
fn at_records_db_06_stats_and_scenario_filter() {
    let s = InMemoryRecordStore::new_in_memory();
    let alice = owner("alice");
    s.commit_transaction(&alice, transaction("image", 1)).unwrap();
    s.commit_transaction(&alice, transaction("Image", 2)).unwrap();
    s.commit_transaction(&alice, transaction("bill", 3)).unwrap();
    s.commit_simulation(&alice, simulation(SimulationScenario::BulkOrder)).unwrap();
    s.commit_simulation(&alice, simulation(SimulationScenario::IncreasePrice))
        .unwrap();

    let stats = s.stats(&alice).unwrap();
    assert_eq!(stats.transactions_total, 3);
    assert_eq!(stats.transactions_by_source.get("image"), Some(&2));
    assert_eq!(stats.simulations_by_scenario.get("bulk_order"), Some(&1));

    let bulk = ListQuery {
        source: Some("bulk_order".to_string()),
        ..ListQuery::default()
    };
    let page = s.list_simulations(&alice, &bulk).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].outcome.scenario, SimulationScenario::BulkOrder);
}
