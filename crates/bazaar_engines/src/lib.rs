#![forbid(unsafe_code)]

pub mod arbitration;
pub mod extraction;
pub mod fallback;
pub mod http;
pub mod simulation;
