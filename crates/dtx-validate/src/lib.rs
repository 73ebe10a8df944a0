//! DTX Validate - structural checks and scoring for merged tokens
//!
//! - [`AccessibilityCalculator`]: WCAG contrast, compliance tiers,
//!   colorblind simulation
//! - [`QualityScorer`]: confidence, completeness and naming
//! - [`ValidationAgent`]: strict or lenient validation of a token set

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod accessibility;
pub mod agent;
pub mod error;
pub mod quality;

pub use accessibility::{
    contrast_ratio, contrast_ratio_rgb, relative_luminance, AccessibilityCalculator, Compliance,
    Deficiency, PaletteReport,
};
pub use agent::{check_structure, overall_score, ValidationAgent};
pub use error::{StructuralIssue, ValidationError};
pub use quality::{is_generic_name, QualityBreakdown, QualityScorer};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
