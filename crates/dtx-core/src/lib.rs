//! DTX Core - shared model for the design token extraction pipeline
//!
//! Everything the pipeline stages exchange lives here:
//! - Tasks, processed images and token artifacts for each stage
//! - Color science (sRGB, CIELAB, CIEDE2000)
//! - Source fingerprints for cache keys
//! - Retry policy and failure classification shared by the I/O stages
//! - Pipeline configuration
//! - DTCG export of validated tokens
//!
//! # Example
//!
//! ```rust,ignore
//! use dtx_core::{Rgb, delta_e_2000};
//!
//! let red: Rgb = "#FF0000".parse()?;
//! let near: Rgb = "#FE0101".parse()?;
//! assert!(delta_e_2000(red.to_lab(), near.to_lab()) < 2.0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod color;
pub mod config;
pub mod error;
pub mod export;
pub mod failure;
pub mod fingerprint;
pub mod retry;
pub mod types;

pub use color::{delta_e_2000, Lab, Rgb};
pub use config::{
    AggregationConfig, BreakerConfig, CacheConfig, DownloadConfig, EnhanceConfig,
    ExtractionConfig, PipelineConfig, PoolConfig, StageSettings, ValidationConfig,
    ValidationMode, ValidatorConfig,
};
pub use error::CoreError;
pub use failure::{Classify, FailureKind};
pub use fingerprint::Fingerprint;
pub use retry::{RetryPolicy, Retryable};
pub use types::{
    ImageFormat, ImageId, MergedToken, PipelineStage, Priority, ProcessedImage, SessionId,
    SourceContribution, Task, TaskId, TokenCandidate, TokenCategory, TokenValue, ValidatedToken,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
