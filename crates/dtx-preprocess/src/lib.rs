//! DTX Preprocess - turns an image reference into a [`ProcessedImage`]
//!
//! Stages run strictly in order and never skip ahead:
//! - [`ImageValidator`]: URL admission with DNS resolution (SSRF guard)
//! - [`ImageDownloader`]: pinned, size-capped, retried fetch
//! - [`magic::validate_magic_bytes`]: signature check, authoritative over headers
//! - [`ImageEnhancer`]: orientation, color mode, resize, local contrast, PNG
//!
//! [`PreprocessingAgent`] composes them behind a fingerprint-keyed cache with
//! at-most-once computation per source.
//!
//! [`ProcessedImage`]: dtx_core::ProcessedImage

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod agent;
pub mod cache;
pub mod downloader;
pub mod enhancer;
pub mod error;
pub mod magic;
pub mod validator;

pub use agent::PreprocessingAgent;
pub use cache::{CacheStats, PreprocessCache};
pub use downloader::{DownloadedImage, ImageDownloader};
pub use enhancer::{EnhancedImage, ImageEnhancer};
pub use error::{DownloadError, EnhanceError, MagicError, PreprocessError, ValidationError};
pub use magic::{detect_format, validate_magic_bytes};
pub use validator::{is_forbidden_ip, ImageValidator, Resolver, SystemResolver, ValidatedUrl};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
