#![forbid(unsafe_code)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

pub const RECEIPT_MAX_ITEMS: usize = 200;
pub const RECEIPT_MAX_TEXT_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default, alias = "price")]
    pub unit_price: Option<Decimal>,
    #[serde(default, alias = "total", alias = "amount")]
    pub line_total: Option<Decimal>,
}

impl Validate for LineItem {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "line_item.name",
                reason: "must not be empty",
            });
        }
        if self.name.len() > RECEIPT_MAX_TEXT_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "line_item.name",
                reason: "must be <= 256 chars",
            });
        }
        non_negative("line_item.quantity", self.quantity)?;
        non_negative("line_item.unit_price", self.unit_price)?;
        non_negative("line_item.line_total", self.line_total)
    }
}

/// Structured receipt / bill extraction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceiptPayload {
    #[serde(default, alias = "merchant", alias = "store")]
    pub vendor: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default, alias = "grand_total")]
    pub total: Option<Decimal>,
}

impl ReceiptPayload {
    pub fn with_total(total: Decimal) -> Self {
        Self {
            total: Some(total),
            ..Self::default()
        }
    }

    /// Sum of line totals, when every line carries one.
    pub fn line_total_sum(&self) -> Option<Decimal> {
        if self.items.is_empty() {
            return None;
        }
        self.items
            .iter()
            .map(|i| i.line_total)
            .try_fold(Decimal::ZERO, |acc, v| v.map(|v| acc + v))
    }
}

impl Validate for ReceiptPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        for (field, value) in [
            ("receipt.vendor", &self.vendor),
            ("receipt.date", &self.date),
            ("receipt.currency", &self.currency),
        ] {
            if let Some(v) = value {
                if v.len() > RECEIPT_MAX_TEXT_LEN {
                    return Err(ContractViolation::InvalidValue {
                        field,
                        reason: "must be <= 256 chars",
                    });
                }
            }
        }
        if self.items.len() > RECEIPT_MAX_ITEMS {
            return Err(ContractViolation::InvalidValue {
                field: "receipt.items",
                reason: "must be <= 200 items",
            });
        }
        for item in &self.items {
            item.validate()?;
        }
        non_negative("receipt.total", self.total)?;
        if self.total.is_none() && self.items.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "receipt",
                reason: "must carry a total or at least one item",
            });
        }
        Ok(())
    }
}

fn non_negative(field: &'static str, value: Option<Decimal>) -> Result<(), ContractViolation> {
    match value {
        Some(v) if v.is_sign_negative() && !v.is_zero() => Err(ContractViolation::InvalidValue {
            field,
            reason: "must be >= 0",
        }),
        _ => Ok(()),
    }
}
