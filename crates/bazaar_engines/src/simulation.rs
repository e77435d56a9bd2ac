#![forbid(unsafe_code)]

//! Local what-if math over a small built-in product catalog.

use bazaar_kernel_contracts::candidate::ConfidenceScore;
use bazaar_kernel_contracts::normalize_categorical;
use bazaar_kernel_contracts::simquery::{SimulationQueryPayload, SimulationScenario};
use bazaar_kernel_contracts::simulation::{FinancialSnapshot, ImpactDeltas, SimulationOutcome};
use rust_decimal::Decimal;
use serde::Serialize;

pub const BULK_SHOPS_DEFAULT: u32 = 10;
pub const BULK_DISCOUNT_MAX_PERCENT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductProfile {
    pub name: &'static str,
    pub unit: &'static str,
    /// Prices and costs in whole currency units.
    pub unit_price: i64,
    pub unit_cost: i64,
    pub weekly_units: i64,
}

pub const PRODUCT_CATALOG: [ProductProfile; 5] = [
    ProductProfile {
        name: "rice",
        unit: "kg",
        unit_price: 50,
        unit_cost: 35,
        weekly_units: 100,
    },
    ProductProfile {
        name: "sugar",
        unit: "kg",
        unit_price: 40,
        unit_cost: 28,
        weekly_units: 80,
    },
    ProductProfile {
        name: "wheat",
        unit: "kg",
        unit_price: 45,
        unit_cost: 32,
        weekly_units: 120,
    },
    ProductProfile {
        name: "oil",
        unit: "liter",
        unit_price: 120,
        unit_cost: 85,
        weekly_units: 50,
    },
    ProductProfile {
        name: "pulses",
        unit: "kg",
        unit_price: 80,
        unit_cost: 55,
        weekly_units: 60,
    },
];

/// Used for items the catalog does not know.
pub const GENERIC_PROFILE: ProductProfile = ProductProfile {
    name: "generic",
    unit: "unit",
    unit_price: 50,
    unit_cost: 35,
    weekly_units: 100,
};

pub fn lookup_product(item: &str) -> Option<&'static ProductProfile> {
    let wanted = normalize_categorical(item);
    PRODUCT_CATALOG.iter().find(|p| p.name == wanted)
}

/// First catalog product mentioned anywhere in free text.
pub fn product_mentioned_in(text: &str) -> Option<&'static ProductProfile> {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .find_map(|word| PRODUCT_CATALOG.iter().find(|p| p.name == word))
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioInfo {
    pub scenario: SimulationScenario,
    pub title: &'static str,
    pub description: &'static str,
    pub examples: &'static [&'static str],
}

pub fn scenario_catalog() -> Vec<ScenarioInfo> {
    vec![
        ScenarioInfo {
            scenario: SimulationScenario::IncreasePrice,
            title: "Price increase",
            description: "Raise the selling price and estimate the effect on weekly sales and profit",
            examples: &[
                "What if I increase rice price by 5%?",
                "What happens if I raise oil prices by 10%?",
            ],
        },
        ScenarioInfo {
            scenario: SimulationScenario::DecreasePrice,
            title: "Price decrease",
            description: "Cut the selling price to attract more customers",
            examples: &[
                "What if I reduce sugar price by 3%?",
                "Should I lower wheat prices by 5%?",
            ],
        },
        ScenarioInfo {
            scenario: SimulationScenario::BulkOrder,
            title: "Group bulk order",
            description: "Buy together with nearby shops to get a supplier discount",
            examples: &[
                "What if I order rice together with 10 other shops?",
                "Bulk order of pulses with 5 shops",
            ],
        },
        ScenarioInfo {
            scenario: SimulationScenario::InventoryChange,
            title: "Inventory change",
            description: "Hold more or less stock and see the effect on holding cost and sales",
            examples: &[
                "What if I reduce my oil inventory by 30%?",
                "What if I keep 20% more sugar stock?",
            ],
        },
    ]
}

fn snapshot(unit_price: Decimal, unit_cost: Decimal, weekly_units: Decimal) -> FinancialSnapshot {
    let unit_price = unit_price.round_dp(2);
    let unit_cost = unit_cost.round_dp(2);
    let weekly_units = weekly_units.round_dp(2);
    FinancialSnapshot {
        unit_price,
        unit_cost,
        weekly_units,
        weekly_revenue: (unit_price * weekly_units).round_dp(2),
        weekly_profit: ((unit_price - unit_cost) * weekly_units).round_dp(2),
    }
}

fn percent(value: Decimal) -> Decimal {
    value / Decimal::ONE_HUNDRED
}

/// Run one scenario. Deterministic; the outcome confidence is the confidence
/// of the arbitrated query it came from.
pub fn simulate(query: &SimulationQueryPayload, confidence: ConfidenceScore) -> SimulationOutcome {
    let matched = lookup_product(&query.item);
    let profile = matched.copied().unwrap_or(GENERIC_PROFILE);
    let price = Decimal::from(profile.unit_price);
    let cost = Decimal::from(profile.unit_cost);
    let units = Decimal::from(profile.weekly_units);
    let before = snapshot(price, cost, units);

    let magnitude = query.change_percent.abs();
    let mut assumptions = Vec::new();
    let mut recommendations = Vec::new();
    let after = match query.scenario {
        SimulationScenario::IncreasePrice => {
            let factor = (Decimal::ONE - magnitude * Decimal::new(2, 2)).max(Decimal::new(5, 1));
            assumptions.push(format!(
                "Weekly sales fall 2% for every 1% of price increase, floored at 50% (sales factor {})",
                factor.round_dp(2)
            ));
            recommendations
                .push("Consider gradual price increases to minimize sales impact".to_string());
            snapshot(price * (Decimal::ONE + percent(magnitude)), cost, units * factor)
        }
        SimulationScenario::DecreasePrice => {
            let factor = Decimal::ONE + magnitude * Decimal::new(3, 2);
            assumptions.push(format!(
                "Weekly sales rise 3% for every 1% of price decrease (sales factor {})",
                factor.round_dp(2)
            ));
            recommendations
                .push("Monitor profit margins and adjust strategy based on results".to_string());
            snapshot(price * (Decimal::ONE - percent(magnitude)), cost, units * factor)
        }
        SimulationScenario::BulkOrder => {
            let shops = query.shop_count.unwrap_or(BULK_SHOPS_DEFAULT);
            let discount = ((shops / 5) * 5).min(BULK_DISCOUNT_MAX_PERCENT);
            assumptions.push(format!(
                "Supplier discount of {discount}% on unit cost for a group of {shops} shops (5% per 5 shops, max {BULK_DISCOUNT_MAX_PERCENT}%)"
            ));
            assumptions.push("Selling price and weekly sales stay the same".to_string());
            if discount == 0 {
                recommendations
                    .push("Find at least 5 shops to unlock a supplier discount".to_string());
            } else {
                recommendations
                    .push("Consider forming buying groups for better supplier rates".to_string());
            }
            snapshot(
                price,
                cost * (Decimal::ONE - percent(Decimal::from(discount))),
                units,
            )
        }
        SimulationScenario::InventoryChange => {
            let change = percent(query.change_percent);
            let new_cost = cost * (Decimal::ONE + change * Decimal::new(2, 2));
            let new_units = if change < Decimal::ZERO {
                units * (Decimal::ONE + change / Decimal::TWO)
            } else {
                units
            };
            assumptions.push(
                "Holding cost moves unit cost by 2% of the stock change".to_string(),
            );
            if change < Decimal::ZERO {
                assumptions.push(
                    "Lower stock loses half of the cut as missed sales".to_string(),
                );
                recommendations.push(
                    "Cut stock only on slow-moving items to avoid running out".to_string(),
                );
            } else {
                assumptions.push("Extra stock does not increase weekly sales".to_string());
                recommendations
                    .push("Add stock ahead of festivals or known demand peaks".to_string());
            }
            snapshot(price, new_cost, new_units)
        }
    };
    if matched.is_none() {
        assumptions.push(format!(
            "'{}' is not in the product catalog; a generic profile was used",
            query.item
        ));
    }

    let profit_delta = after.weekly_profit - before.weekly_profit;
    let deltas = ImpactDeltas {
        unit_price: after.unit_price - before.unit_price,
        weekly_units: after.weekly_units - before.weekly_units,
        weekly_revenue: after.weekly_revenue - before.weekly_revenue,
        weekly_profit: profit_delta,
        weekly_profit_percent: if before.weekly_profit.is_zero() {
            None
        } else {
            Some((profit_delta / before.weekly_profit * Decimal::ONE_HUNDRED).round_dp(2))
        },
    };
    if profit_delta < Decimal::ZERO {
        recommendations.push("This change lowers weekly profit; test it on a small scale first".to_string());
    }

    SimulationOutcome {
        scenario: query.scenario,
        item: query.item.clone(),
        catalog_match: matched.is_some(),
        before,
        after,
        deltas,
        assumptions,
        recommendations,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(scenario: SimulationScenario, item: &str, change: i64, shops: Option<u32>) -> SimulationQueryPayload {
        SimulationQueryPayload::v1(scenario, item, Decimal::from(change), shops).unwrap()
    }

    #[test]
    fn at_sim_01_rice_price_increase() {
        let out = simulate(
            &query(SimulationScenario::IncreasePrice, "Rice", 5, None),
            ConfidenceScore::saturating(90),
        );
        assert!(out.catalog_match);
        assert_eq!(out.before.weekly_profit, Decimal::from(1500));
        assert_eq!(out.after.unit_price, Decimal::new(5250, 2));
        assert_eq!(out.after.weekly_units, Decimal::from(90));
        // (52.50 - 35) * 90
        assert_eq!(out.after.weekly_profit, Decimal::new(157500, 2));
        assert_eq!(out.deltas.weekly_profit, Decimal::from(75));
        assert_eq!(out.deltas.weekly_profit_percent, Some(Decimal::from(5)));
    }

    #[test]
    fn at_sim_02_large_increase_floors_sales_at_half() {
        let out = simulate(
            &query(SimulationScenario::IncreasePrice, "sugar", 40, None),
            ConfidenceScore::saturating(70),
        );
        assert_eq!(out.after.weekly_units, Decimal::from(40));
    }

    #[test]
    fn at_sim_03_price_decrease_lifts_sales() {
        let out = simulate(
            &query(SimulationScenario::DecreasePrice, "wheat", -10, None),
            ConfidenceScore::saturating(70),
        );
        assert_eq!(out.after.unit_price, Decimal::new(4050, 2));
        assert_eq!(out.after.weekly_units, Decimal::from(156));
    }

    #[test]
    fn at_sim_04_bulk_discount_caps_at_twenty_percent() {
        let ten = simulate(
            &query(SimulationScenario::BulkOrder, "oil", 0, Some(10)),
            ConfidenceScore::saturating(80),
        );
        assert_eq!(ten.after.unit_cost, Decimal::new(7650, 2));
        let many = simulate(
            &query(SimulationScenario::BulkOrder, "oil", 0, Some(100)),
            ConfidenceScore::saturating(80),
        );
        assert_eq!(many.after.unit_cost, Decimal::from(68));
        assert_eq!(many.after.unit_price, many.before.unit_price);
    }

    #[test]
    fn at_sim_05_unknown_item_uses_generic_profile() {
        let out = simulate(
            &query(SimulationScenario::InventoryChange, "coffee", -30, None),
            ConfidenceScore::saturating(20),
        );
        assert!(!out.catalog_match);
        assert_eq!(out.before.unit_price, Decimal::from(50));
        assert_eq!(out.after.weekly_units, Decimal::from(85));
        assert!(out.assumptions.iter().any(|a| a.contains("coffee")));
    }

    #[test]
    fn at_sim_06_catalog_lists_every_scenario() {
        let catalog = scenario_catalog();
        for s in SimulationScenario::ALL {
            assert!(catalog.iter().any(|c| c.scenario == s && !c.examples.is_empty()));
        }
        assert_eq!(product_mentioned_in("raise PULSES price").map(|p| p.name), Some("pulses"));
        assert!(product_mentioned_in("raise coffee price").is_none());
    }
}
