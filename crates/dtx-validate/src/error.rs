//! Validation errors
//!
//! [`StructuralIssue`]s are per-token findings recorded on the token;
//! [`ValidationError`] aborts a validation run.

use dtx_core::{Classify, FailureKind};
use std::fmt;

/// Structural defect that makes a token invalid
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralIssue {
    EmptyName,
    InvalidHex(String),
    ExpectedText(&'static str),
    ExpectedNumber(&'static str),
    NonPositive { field: &'static str, value: f64 },
    Negative { field: &'static str, value: f64 },
    OutOfRange { field: &'static str, value: f64, min: f64, max: f64 },
    MissingField(&'static str),
    TooFewStops(usize),
}

impl fmt::Display for StructuralIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralIssue::EmptyName => f.write_str("name is empty"),
            StructuralIssue::InvalidHex(value) => write!(f, "'{value}' is not a hex color"),
            StructuralIssue::ExpectedText(field) => write!(f, "{field} must be a string"),
            StructuralIssue::ExpectedNumber(field) => write!(f, "{field} must be a number"),
            StructuralIssue::NonPositive { field, value } => {
                write!(f, "{field} must be positive, got {value}")
            }
            StructuralIssue::Negative { field, value } => {
                write!(f, "{field} must not be negative, got {value}")
            }
            StructuralIssue::OutOfRange { field, value, min, max } => {
                write!(f, "{field} {value} outside [{min}, {max}]")
            }
            StructuralIssue::MissingField(field) => write!(f, "missing {field}"),
            StructuralIssue::TooFewStops(n) => write!(f, "gradient needs at least 2 stops, got {n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid color: {0}")]
    InvalidColor(String),

    #[error("score for '{name}' is not finite")]
    NonFiniteScore { name: String },
}

impl Classify for ValidationError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ValidationError::InvalidColor(_) => FailureKind::Rejected,
            ValidationError::NonFiniteScore { .. } => FailureKind::Internal,
        }
    }
}
