#![forbid(unsafe_code)]

//! CSV rendering of an owner's history.

use bazaar_kernel_contracts::records::{PersistedSimulation, PersistedTransaction};
use rust_decimal::Decimal;

const TRANSACTION_HEADER: [&str; 10] = [
    "id",
    "created_at_ms",
    "source",
    "vendor",
    "date",
    "currency",
    "total",
    "item_count",
    "decision_basis",
    "confidence",
];

const SIMULATION_HEADER: [&str; 11] = [
    "id",
    "created_at_ms",
    "query",
    "scenario",
    "item",
    "revenue_before",
    "revenue_after",
    "profit_before",
    "profit_after",
    "profit_change_percent",
    "confidence",
];

pub fn transactions_csv(rows: &[PersistedTransaction]) -> String {
    let mut out = csv_line(TRANSACTION_HEADER.iter().map(|h| h.to_string()));
    for row in rows {
        let receipt = row.record.final_payload().as_receipt();
        out.push_str(&csv_line([
            row.id.as_str().to_string(),
            row.created_at.0.to_string(),
            row.source.clone(),
            receipt.and_then(|r| r.vendor.clone()).unwrap_or_default(),
            receipt.and_then(|r| r.date.clone()).unwrap_or_default(),
            receipt.and_then(|r| r.currency.clone()).unwrap_or_default(),
            decimal_cell(receipt.and_then(|r| r.total)),
            receipt.map(|r| r.items.len()).unwrap_or(0).to_string(),
            row.record.decision_basis().as_str().to_string(),
            row.record.confidence().value().to_string(),
        ]));
    }
    out
}

pub fn simulations_csv(rows: &[PersistedSimulation]) -> String {
    let mut out = csv_line(SIMULATION_HEADER.iter().map(|h| h.to_string()));
    for row in rows {
        let o = &row.outcome;
        out.push_str(&csv_line([
            row.id.as_str().to_string(),
            row.created_at.0.to_string(),
            row.query.clone(),
            o.scenario.as_str().to_string(),
            o.item.clone(),
            o.before.weekly_revenue.to_string(),
            o.after.weekly_revenue.to_string(),
            o.before.weekly_profit.to_string(),
            o.after.weekly_profit.to_string(),
            decimal_cell(o.deltas.weekly_profit_percent),
            o.confidence.value().to_string(),
        ]));
    }
    out
}

fn decimal_cell(v: Option<Decimal>) -> String {
    v.map(|d| d.to_string()).unwrap_or_default()
}

fn csv_line(cells: impl IntoIterator<Item = String>) -> String {
    let mut line = cells
        .into_iter()
        .map(|c| escape_cell(&c))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// RFC 4180 quoting, plus a leading quote mark on cells a spreadsheet would
/// evaluate as a formula.
pub fn escape_cell(raw: &str) -> String {
    let guarded = if raw.starts_with(['=', '+', '-', '@']) && raw.parse::<f64>().is_err() {
        format!("'{raw}")
    } else {
        raw.to_string()
    };
    if guarded.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", guarded.replace('"', "\"\""))
    } else {
        guarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_engines::simulation::simulate;
    use bazaar_kernel_contracts::arbitration::{ArbitratedRecord, DecisionBasis};
    use bazaar_kernel_contracts::candidate::{
        CandidateResult, ConfidenceScore, ExtractionPayload, SourceId,
    };
    use bazaar_kernel_contracts::receipt::ReceiptPayload;
    use bazaar_kernel_contracts::records::{OwnerId, RecordId};
    use bazaar_kernel_contracts::simquery::{SimulationQueryPayload, SimulationScenario};
    use bazaar_kernel_contracts::TimestampMs;

    fn record(payload: ExtractionPayload, conf: u8) -> ArbitratedRecord {
        let c = ConfidenceScore::new(conf).unwrap();
        let cand = CandidateResult::v1(SourceId::SourceA, payload.clone(), c, TimestampMs(1)).unwrap();
        ArbitratedRecord::v1(
            "a".repeat(64),
            payload,
            DecisionBasis::SingleSourceOnly,
            c,
            vec![cand],
        )
        .unwrap()
    }

    #[test]
    fn at_export_01_cells_with_separators_are_quoted() {
        assert_eq!(escape_cell("plain"), "plain");
        assert_eq!(escape_cell("a,b"), "\"a,b\"");
        assert_eq!(escape_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_cell("=SUM(A1)"), "'=SUM(A1)");
        assert_eq!(escape_cell("-5.5"), "-5.5");
    }

    #[test]
    fn at_export_02_transaction_rows_flatten_receipt() {
        let mut receipt = ReceiptPayload::with_total(Decimal::new(10550, 2));
        receipt.vendor = Some("Sharma, General Store".to_string());
        let row = PersistedTransaction {
            id: RecordId::new("0123456789abcdef0123456789abcdef").unwrap(),
            owner: OwnerId::new("user-1").unwrap(),
            source: "bill".to_string(),
            raw_input_ref: "r.jpg".to_string(),
            record: record(ExtractionPayload::Receipt(receipt), 90),
            created_at: TimestampMs(1_700_000_000_000),
            updated_at: TimestampMs(1_700_000_000_000),
        };
        let csv = transactions_csv(&[row]);
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[0], TRANSACTION_HEADER.join(","));
        assert_eq!(
            lines[1],
            "0123456789abcdef0123456789abcdef,1700000000000,bill,\"Sharma, General Store\",,,105.50,0,SINGLE_SOURCE_ONLY,90"
        );
    }

    #[test]
    fn at_export_03_simulation_rows_use_outcome_numbers() {
        let query = SimulationQueryPayload::v1(
            SimulationScenario::IncreasePrice,
            "rice",
            Decimal::from(10),
            None,
        )
        .unwrap();
        let outcome = simulate(&query, ConfidenceScore::new(80).unwrap());
        let row = PersistedSimulation {
            id: RecordId::new("fedcba9876543210fedcba9876543210").unwrap(),
            owner: OwnerId::new("user-1").unwrap(),
            query: "What if I raise rice by 10%?".to_string(),
            record: record(ExtractionPayload::SimulationQuery(query), 80),
            outcome: outcome.clone(),
            created_at: TimestampMs(5),
            updated_at: TimestampMs(5),
        };
        let csv = simulations_csv(&[row]);
        let data = csv.split("\r\n").nth(1).unwrap();
        assert!(data.starts_with("fedcba9876543210fedcba9876543210,5,What if I raise rice by 10%?,increase_price,rice,"));
        assert!(data.contains(&outcome.after.weekly_profit.to_string()));
        assert!(data.ends_with(",80"));
    }
}
