#![forbid(unsafe_code)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::candidate::ConfidenceScore;
use crate::simquery::SimulationScenario;

/// Weekly economics of one product at a point in the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    pub unit_price: Decimal,
    pub unit_cost: Decimal,
    pub weekly_units: Decimal,
    pub weekly_revenue: Decimal,
    pub weekly_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactDeltas {
    pub unit_price: Decimal,
    pub weekly_units: Decimal,
    pub weekly_revenue: Decimal,
    pub weekly_profit: Decimal,
    /// Profit change relative to the baseline, in percent. `None` when the
    /// baseline profit is zero.
    pub weekly_profit_percent: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub scenario: SimulationScenario,
    pub item: String,
    /// False when the item is not in the catalog and a default profile was used.
    pub catalog_match: bool,
    pub before: FinancialSnapshot,
    pub after: FinancialSnapshot,
    pub deltas: ImpactDeltas,
    pub assumptions: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: ConfidenceScore,
}
