#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::TimestampMs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    ReceiptUpload,
    Simulation,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::ReceiptUpload => "receipt_upload",
            OperationKind::Simulation => "simulation",
        }
    }
}

/// A client-observed write that did not reach durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsyncedOperation {
    pub kind: OperationKind,
    /// JSON of what the client attempted to persist, kept for later resubmission.
    pub attempted_payload: String,
    pub failure_reason: String,
    pub recorded_at: TimestampMs,
}
