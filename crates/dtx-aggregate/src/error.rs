//! Aggregation errors
//!
//! Aggregation is local and deterministic; every error here is final.

use dtx_core::{Classify, FailureKind, TokenCategory};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("candidate '{name}' has confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { name: String, confidence: f64 },

    #[error("candidate '{name}' is {found}, expected {expected}")]
    CategoryMismatch {
        name: String,
        expected: TokenCategory,
        found: TokenCategory,
    },

    #[error("cluster has no members")]
    EmptyCluster,
}

impl Classify for AggregationError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Internal
    }
}
