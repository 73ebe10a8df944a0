//! Error types for preprocessing
//!
//! One enum per stage, folded into [`PreprocessError`] which reports the
//! offending stage through [`PreprocessError::stage`]. All variants carry
//! owned strings so errors can be shared out of the cache.

use dtx_core::{Classify, FailureKind, ImageFormat, Retryable};
use std::net::IpAddr;
use std::time::Duration;

/// URL admission failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed URL: {0}")]
    Malformed(String),

    #[error("URL exceeds {max} characters")]
    TooLong { max: usize },

    #[error("scheme '{0}' is not allowed")]
    UnsupportedScheme(String),

    #[error("URL embeds credentials")]
    Credentials,

    #[error("URL has no host")]
    MissingHost,

    #[error("host '{0}' is numeric without resolvable structure")]
    NumericHost(String),

    #[error("host '{0}' is blocked")]
    BlockedHost(String),

    #[error("host '{host}' resolves to forbidden address {addr}")]
    ForbiddenAddress { host: String, addr: IpAddr },

    #[error("host '{host}' could not be resolved: {reason}")]
    Unresolvable { host: String, reason: String },
}

/// Download failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("more than {0} redirects")]
    TooManyRedirects(usize),

    #[error("redirect without usable Location header")]
    BadRedirect,

    #[error("redirect target rejected: {0}")]
    RedirectRejected(#[source] ValidationError),

    #[error("content type '{0}' is not a supported image type")]
    UnsupportedContentType(String),
}

impl Retryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Timeout(_) | DownloadError::Transport(_) => true,
            DownloadError::Status(status) => *status >= 500,
            _ => false,
        }
    }
}

/// Signature check failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MagicError {
    #[error("empty payload")]
    Empty,

    #[error("payload matches no supported image signature")]
    UnknownSignature,

    #[error("declared {declared} but bytes are {detected}")]
    Mismatch {
        declared: ImageFormat,
        detected: ImageFormat,
    },
}

/// Pixel pipeline failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnhanceError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("enhancement worker failed: {0}")]
    Worker(String),
}

/// Preprocessing failure, tagged with its stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    #[error("validate: {0}")]
    Validation(#[from] ValidationError),

    #[error("download: {0}")]
    Download(#[from] DownloadError),

    #[error("verify: {0}")]
    BytesRejected(#[from] MagicError),

    #[error("enhance: {0}")]
    Enhancement(#[from] EnhanceError),
}

impl PreprocessError {
    /// Name of the stage that failed
    #[inline]
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            PreprocessError::Validation(_) => "validate",
            PreprocessError::Download(_) => "download",
            PreprocessError::BytesRejected(_) => "verify",
            PreprocessError::Enhancement(_) => "enhance",
        }
    }
}

impl Classify for DownloadError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            DownloadError::Timeout(_) => FailureKind::Timeout,
            DownloadError::Transport(_) => FailureKind::Transport,
            DownloadError::Status(429) => FailureKind::RateLimited,
            DownloadError::Status(status) if *status >= 500 => FailureKind::Unavailable,
            _ => FailureKind::Rejected,
        }
    }
}

impl Classify for PreprocessError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            PreprocessError::Download(err) => err.failure_kind(),
            PreprocessError::Enhancement(EnhanceError::Worker(_)) => FailureKind::Internal,
            _ => FailureKind::Rejected,
        }
    }
}
