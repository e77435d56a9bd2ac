#![forbid(unsafe_code)]

pub mod arbitration;
pub mod candidate;
pub mod common;
pub mod receipt;
pub mod records;
pub mod simquery;
pub mod simulation;
pub mod unsynced;

pub use common::{
    normalize_categorical, ContractViolation, SchemaVersion, TimestampMs, Validate,
};
