//! DTX Aggregate - merging token candidates across images
//!
//! - [`Deduplicator`]: CIEDE2000 clustering for colors, canonical-value
//!   grouping for everything else
//! - [`ProvenanceTracker`]: contributing images and mean confidence
//! - [`AggregationAgent`]: per-category composition of the two

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod agent;
pub mod dedup;
pub mod error;
pub mod provenance;

pub use agent::{Aggregation, AggregationAgent};
pub use dedup::{Cluster, Deduplicator};
pub use error::AggregationError;
pub use provenance::{mean_confidence, ProvenanceRecord, ProvenanceTracker};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
