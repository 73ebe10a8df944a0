//! DTX Extract - token extraction against a vision analysis service
//!
//! - [`schema`]: per-category payload types, their JSON Schemas and
//!   conversion into [`dtx_core::TokenCandidate`]s
//! - [`AnalysisService`]: the seam to the external model
//! - [`HttpAnalysisClient`]: chat-completions implementation
//! - [`ExtractionAgent`]: retry, timeout and schema enforcement

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod agent;
pub mod client;
pub mod error;
pub mod schema;
pub mod service;

pub use agent::ExtractionAgent;
pub use client::HttpAnalysisClient;
pub use error::{ExtractionError, ServiceError};
pub use schema::{instructions, response_schema, strict_schema, SchemaRegistry};
pub use service::{AnalysisRequest, AnalysisService};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
