//! Error types for extraction

use dtx_core::{Classify, FailureKind, Retryable};
use std::time::Duration;

/// Failure reported by an [`AnalysisService`](crate::AnalysisService)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("analysis call timed out")]
    Timeout,

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("service unavailable: HTTP {status}")]
    Unavailable {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("request rejected: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("service misconfigured: {0}")]
    Misconfigured(String),
}

/// Extraction failure for one category
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("service unavailable: HTTP {status}")]
    ServiceUnavailable {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("response failed schema validation: {0}")]
    SchemaInvalid(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ExtractionError {
    /// Map a service failure observed under `timeout`
    #[must_use]
    pub fn from_service(err: ServiceError, timeout: Duration) -> Self {
        match err {
            ServiceError::Timeout => ExtractionError::Timeout(timeout),
            ServiceError::RateLimited { retry_after } => ExtractionError::RateLimited { retry_after },
            ServiceError::Unavailable {
                status,
                retry_after,
            } => ExtractionError::ServiceUnavailable {
                status,
                retry_after,
            },
            ServiceError::Rejected { status, message } => {
                ExtractionError::Rejected(format!("HTTP {status}: {message}"))
            }
            ServiceError::Transport(msg) => ExtractionError::Transport(msg),
            ServiceError::InvalidResponse(msg) => ExtractionError::SchemaInvalid(msg),
            ServiceError::Misconfigured(msg) => ExtractionError::Rejected(msg),
        }
    }
}

impl Retryable for ExtractionError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractionError::Timeout(_)
                | ExtractionError::RateLimited { .. }
                | ExtractionError::ServiceUnavailable { .. }
                | ExtractionError::Transport(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ExtractionError::RateLimited { retry_after }
            | ExtractionError::ServiceUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl Classify for ExtractionError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ExtractionError::Timeout(_) => FailureKind::Timeout,
            ExtractionError::RateLimited { .. } => FailureKind::RateLimited,
            ExtractionError::ServiceUnavailable { .. } => FailureKind::Unavailable,
            ExtractionError::SchemaInvalid(_) => FailureKind::InvalidResponse,
            ExtractionError::Rejected(_) => FailureKind::Rejected,
            ExtractionError::Transport(_) => FailureKind::Transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_carries_server_delay() {
        let err = ExtractionError::from_service(
            ServiceError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            },
            Duration::from_secs(60),
        );
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn unavailable_carries_server_delay() {
        let err = ExtractionError::from_service(
            ServiceError::Unavailable {
                status: 503,
                retry_after: Some(Duration::from_secs(7)),
            },
            Duration::from_secs(60),
        );
        assert!(err.is_retryable());
        assert_eq!(err.failure_kind(), FailureKind::Unavailable);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let bare = ExtractionError::from_service(
            ServiceError::Unavailable {
                status: 502,
                retry_after: None,
            },
            Duration::from_secs(60),
        );
        assert_eq!(bare.retry_after(), None);
    }

    #[test]
    fn schema_failures_are_final() {
        let err = ExtractionError::SchemaInvalid("missing colors".into());
        assert!(!err.is_retryable());
        assert_eq!(err.failure_kind(), FailureKind::InvalidResponse);
    }
}
