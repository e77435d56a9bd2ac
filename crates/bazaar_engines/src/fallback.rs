#![forbid(unsafe_code)]

//! Deterministic keyword / regex heuristics used when both remote sources fail.

use std::str::FromStr;
use std::sync::OnceLock;

use bazaar_kernel_contracts::candidate::{ExtractionPayload, PayloadSchema};
use bazaar_kernel_contracts::receipt::{ReceiptPayload, RECEIPT_MAX_TEXT_LEN};
use bazaar_kernel_contracts::simquery::{SimulationQueryPayload, SimulationScenario};
use bazaar_kernel_contracts::Validate;
use regex::Regex;
use rust_decimal::Decimal;

use crate::simulation::{product_mentioned_in, BULK_SHOPS_DEFAULT};

const INCREASE_WORDS: [&str; 4] = ["increase", "raise", "hike", "higher"];
const DECREASE_WORDS: [&str; 5] = ["decrease", "reduce", "lower", "cut", "drop"];

static TOTAL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static NUMBER_RE: OnceLock<Option<Regex>> = OnceLock::new();
static SHOPS_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CURRENCY_CODE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static DATE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Best-effort payload from plain text, or `None` when nothing usable is found.
pub fn fallback_payload(schema: PayloadSchema, text: &str) -> Option<ExtractionPayload> {
    match schema {
        PayloadSchema::Receipt => receipt_from_text(text).map(ExtractionPayload::Receipt),
        PayloadSchema::SimulationQuery => {
            simulation_query_from_text(text).map(ExtractionPayload::SimulationQuery)
        }
    }
}

fn contains_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

pub fn detect_scenario(text: &str) -> Option<SimulationScenario> {
    let lower = text.to_lowercase();
    if contains_any(&lower, &["bulk", "together", "group order"]) {
        Some(SimulationScenario::BulkOrder)
    } else if contains_any(&lower, &["inventory", "stock"]) {
        Some(SimulationScenario::InventoryChange)
    } else if !lower.contains("price") {
        // Sales, margin or other targets are not price scenarios.
        None
    } else if contains_any(&lower, &INCREASE_WORDS) {
        Some(SimulationScenario::IncreasePrice)
    } else if contains_any(&lower, &DECREASE_WORDS) || lower.contains("discount") {
        Some(SimulationScenario::DecreasePrice)
    } else {
        None
    }
}

pub fn simulation_query_from_text(text: &str) -> Option<SimulationQueryPayload> {
    let scenario = detect_scenario(text)?;
    let lower = text.to_lowercase();
    let item = product_mentioned_in(text)
        .map(|p| p.name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let (change, shops) = match scenario {
        SimulationScenario::BulkOrder => {
            let shops = cached(&SHOPS_RE, r"(?i)(\d{1,5})\s*(?:other\s+)?(?:shops?|stores?|shopkeepers?|people)")
                .and_then(|re| re.captures(text))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(BULK_SHOPS_DEFAULT);
            (Decimal::ZERO, Some(shops))
        }
        SimulationScenario::IncreasePrice => (first_number(text)?.abs(), None),
        SimulationScenario::DecreasePrice => (-first_number(text)?.abs(), None),
        SimulationScenario::InventoryChange => {
            let n = first_number(text)?.abs();
            if contains_any(&lower, &DECREASE_WORDS) || lower.contains("less") {
                (-n, None)
            } else {
                (n, None)
            }
        }
    };
    SimulationQueryPayload::v1(scenario, item, change, shops).ok()
}

fn first_number(text: &str) -> Option<Decimal> {
    cached(&NUMBER_RE, r"(\d+(?:\.\d+)?)\s*%?")?
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| Decimal::from_str(m.as_str()).ok())
}

pub fn receipt_from_text(text: &str) -> Option<ReceiptPayload> {
    let total_re = cached(
        &TOTAL_RE,
        r"(?im)\b(?:grand\s+total|net\s+amount|amount\s+due|total)\b[^0-9\n]*([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
    )?;
    // The last total line wins; subtotals usually come first.
    let total = total_re
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| Decimal::from_str(&m.as_str().replace(',', "")).ok())
        .last()?;

    let receipt = ReceiptPayload {
        vendor: vendor_line(text),
        date: cached(&DATE_RE, r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4})\b")
            .and_then(|re| re.captures(text))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        currency: detect_currency(text).map(str::to_string),
        items: Vec::new(),
        total: Some(total),
    };
    receipt.validate().ok()?;
    Some(receipt)
}

pub fn detect_currency(text: &str) -> Option<&'static str> {
    if text.contains('₹') || text.contains("Rs.") || text.contains("Rs ") {
        return Some("INR");
    }
    if text.contains('€') {
        return Some("EUR");
    }
    if text.contains('£') {
        return Some("GBP");
    }
    if text.contains('$') {
        return Some("USD");
    }
    let code = cached(&CURRENCY_CODE_RE, r"\b(INR|USD|EUR|GBP)\b")?
        .captures(text)?
        .get(1)?
        .as_str();
    match code {
        "INR" => Some("INR"),
        "USD" => Some("USD"),
        "EUR" => Some("EUR"),
        "GBP" => Some("GBP"),
        _ => None,
    }
}

fn vendor_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.len() <= RECEIPT_MAX_TEXT_LEN)
        .find(|l| {
            !l.chars().any(|c| c.is_ascii_digit()) && !l.to_lowercase().contains("total")
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_fallback_01_price_increase_with_catalog_item() {
        let q = simulation_query_from_text("What if I increase rice price by 5%?").unwrap();
        assert_eq!(q.scenario, SimulationScenario::IncreasePrice);
        assert_eq!(q.item, "rice");
        assert_eq!(q.change_percent, Decimal::from(5));
    }

    #[test]
    fn at_fallback_02_decrease_is_negative_and_unknown_item() {
        let q = simulation_query_from_text("should I reduce coffee price by 2.5 percent").unwrap();
        assert_eq!(q.scenario, SimulationScenario::DecreasePrice);
        assert_eq!(q.item, "unknown");
        assert_eq!(q.change_percent, Decimal::new(-25, 1));
    }

    #[test]
    fn at_fallback_03_bulk_reads_shop_count() {
        let q = simulation_query_from_text("order sugar together with 15 other shops").unwrap();
        assert_eq!(q.scenario, SimulationScenario::BulkOrder);
        assert_eq!(q.shop_count, Some(15));
        let q = simulation_query_from_text("bulk buying of oil").unwrap();
        assert_eq!(q.shop_count, Some(BULK_SHOPS_DEFAULT));
    }

    #[test]
    fn at_fallback_04_no_scenario_or_no_number_yields_nothing() {
        assert!(simulation_query_from_text("how is the weather today").is_none());
        assert!(simulation_query_from_text("increase rice price a bit").is_none());
    }

    #[test]
    fn at_fallback_07_price_scenarios_need_the_word_price() {
        assert!(simulation_query_from_text("What if I increase my sales by 10%?").is_none());
        assert!(simulation_query_from_text("should I reduce staff hours by 20%").is_none());
        assert_eq!(
            detect_scenario("raise oil prices by 10%"),
            Some(SimulationScenario::IncreasePrice)
        );
        assert_eq!(
            detect_scenario("what if I discount the sugar price by 3%"),
            Some(SimulationScenario::DecreasePrice)
        );
    }

    #[test]
    fn at_fallback_05_receipt_total_currency_vendor() {
        let text = "Sharma General Store\n12/03/2024\nRice 2kg 100.00\nSubtotal 100.00\nGrand Total: ₹ 1,105.50\n";
        let r = receipt_from_text(text).unwrap();
        assert_eq!(r.total, Some(Decimal::new(110550, 2)));
        assert_eq!(r.currency.as_deref(), Some("INR"));
        assert_eq!(r.vendor.as_deref(), Some("Sharma General Store"));
        assert_eq!(r.date.as_deref(), Some("12/03/2024"));
    }

    #[test]
    fn at_fallback_06_receipt_without_total_yields_nothing() {
        assert!(receipt_from_text("just a photo caption").is_none());
        assert!(fallback_payload(PayloadSchema::Receipt, "TOTAL USD 42").is_some());
    }
}
