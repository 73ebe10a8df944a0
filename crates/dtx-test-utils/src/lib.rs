//! Testing utilities for the DTX workspace
//!
//! Shared test helpers: synthetic image payloads, token builders, a
//! scripted analysis service and a static DNS resolver.

#![allow(missing_docs)]

pub mod fixtures;
pub mod resolver;
pub mod service;

pub use resolver::StaticResolver;
pub use service::{color_response, spacing_response, Reply, ScriptedAnalysisService};
