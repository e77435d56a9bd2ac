#![forbid(unsafe_code)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationScenario {
    IncreasePrice,
    DecreasePrice,
    BulkOrder,
    InventoryChange,
}

impl SimulationScenario {
    pub const ALL: [SimulationScenario; 4] = [
        SimulationScenario::IncreasePrice,
        SimulationScenario::DecreasePrice,
        SimulationScenario::BulkOrder,
        SimulationScenario::InventoryChange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SimulationScenario::IncreasePrice => "increase_price",
            SimulationScenario::DecreasePrice => "decrease_price",
            SimulationScenario::BulkOrder => "bulk_order",
            SimulationScenario::InventoryChange => "inventory_change",
        }
    }
}

/// Parameters parsed out of a free-text "what if" question.
///
/// `change_percent` is signed from the shopkeeper's point of view: a 5% price
/// cut is `-5`. For `BulkOrder` it is unused and `shop_count` carries the
/// group size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationQueryPayload {
    pub scenario: SimulationScenario,
    pub item: String,
    #[serde(default, alias = "change")]
    pub change_percent: Decimal,
    #[serde(default, alias = "num_shops")]
    pub shop_count: Option<u32>,
}

impl SimulationQueryPayload {
    pub fn v1(
        scenario: SimulationScenario,
        item: impl Into<String>,
        change_percent: Decimal,
        shop_count: Option<u32>,
    ) -> Result<Self, ContractViolation> {
        let p = Self {
            scenario,
            item: item.into(),
            change_percent,
            shop_count,
        };
        p.validate()?;
        Ok(p)
    }
}

impl Validate for SimulationQueryPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.item.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "simulation_query.item",
                reason: "must not be empty",
            });
        }
        if self.item.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "simulation_query.item",
                reason: "must be <= 64 chars",
            });
        }
        if self.change_percent < Decimal::from(-100) || self.change_percent > Decimal::from(1000)
        {
            return Err(ContractViolation::InvalidValue {
                field: "simulation_query.change_percent",
                reason: "must be within [-100, 1000]",
            });
        }
        if let Some(n) = self.shop_count {
            if n == 0 || n > 10_000 {
                return Err(ContractViolation::InvalidValue {
                    field: "simulation_query.shop_count",
                    reason: "must be within [1, 10000]",
                });
            }
        }
        Ok(())
    }
}
