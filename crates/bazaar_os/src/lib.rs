#![forbid(unsafe_code)]

pub mod app_ingress;

pub use app_ingress::{
    AppIngressRuntime, IngressConfig, IngressError, ReceiptIngressOutcome, ReceiptIngressRequest,
    SimulationIngressOutcome, SimulationIngressRequest,
};
