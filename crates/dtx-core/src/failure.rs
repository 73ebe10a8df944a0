//! Failure classification shared by all stages
//!
//! Circuit breakers and retry loops never inspect concrete error types;
//! they ask for a [`FailureKind`] through [`Classify`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input refused before any work (bad URL, bad bytes, bad token)
    Rejected,
    /// Call exceeded its deadline
    Timeout,
    /// Dependency asked us to slow down
    RateLimited,
    /// Dependency returned a server-side failure
    Unavailable,
    /// Dependency answered with something off-contract
    InvalidResponse,
    /// Connection-level failure
    Transport,
    /// Caller cancelled the work
    Cancelled,
    /// Local logic failure
    Internal,
}

impl FailureKind {
    /// Kinds worth retrying against the same dependency
    #[inline]
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::RateLimited
                | FailureKind::Unavailable
                | FailureKind::Transport
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Rejected => "rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Unavailable => "unavailable",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Transport => "transport",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors that can report their failure kind
pub trait Classify {
    /// Coarse failure category
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for FailureKind {
    fn failure_kind(&self) -> FailureKind {
        *self
    }
}
