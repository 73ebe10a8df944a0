//! Core types for the extraction pipeline
//!
//! Defines the artifacts that flow between stages:
//! - [`Task`]: one unit of work submitted by the caller
//! - [`ProcessedImage`]: output of preprocessing
//! - [`TokenCandidate`]: one raw token reported for one image
//! - [`MergedToken`]: deduplicated token with provenance
//! - [`ValidatedToken`]: scored terminal artifact

use crate::error::CoreError;
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(
    /// Unique task identifier (ULID for sortability)
    TaskId
);
ulid_id!(
    /// Identifier generated for each processed image
    ImageId
);
ulid_id!(
    /// Identifier grouping the tasks of one extraction session
    SessionId
);

/// Token categories the extraction service can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenCategory {
    Color,
    Spacing,
    Shadow,
    Typography,
    Gradient,
}

impl TokenCategory {
    /// All categories in canonical order
    pub const ALL: [TokenCategory; 5] = [
        TokenCategory::Color,
        TokenCategory::Spacing,
        TokenCategory::Shadow,
        TokenCategory::Typography,
        TokenCategory::Gradient,
    ];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TokenCategory::Color => "color",
            TokenCategory::Spacing => "spacing",
            TokenCategory::Shadow => "shadow",
            TokenCategory::Typography => "typography",
            TokenCategory::Gradient => "gradient",
        }
    }

    /// DTCG `$type` for tokens of this category
    #[inline]
    #[must_use]
    pub const fn dtcg_type(&self) -> &'static str {
        match self {
            TokenCategory::Color => "color",
            TokenCategory::Spacing => "dimension",
            TokenCategory::Shadow => "shadow",
            TokenCategory::Typography => "typography",
            TokenCategory::Gradient => "gradient",
        }
    }
}

impl fmt::Display for TokenCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "color" | "colors" => Ok(TokenCategory::Color),
            "spacing" => Ok(TokenCategory::Spacing),
            "shadow" | "shadows" => Ok(TokenCategory::Shadow),
            "typography" => Ok(TokenCategory::Typography),
            "gradient" | "gradients" => Ok(TokenCategory::Gradient),
            other => Err(CoreError::UnknownCategory(other.to_string())),
        }
    }
}

/// Task priority (higher runs first within a batch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Pipeline stages guarded by the agent pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Preprocess,
    Extract,
    Aggregate,
    Validate,
}

impl PipelineStage {
    /// All stages in execution order
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::Preprocess,
        PipelineStage::Extract,
        PipelineStage::Aggregate,
        PipelineStage::Validate,
    ];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Preprocess => "preprocess",
            PipelineStage::Extract => "extract",
            PipelineStage::Aggregate => "aggregate",
            PipelineStage::Validate => "validate",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work: an image reference and the categories to extract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Source image URL
    pub image_url: String,
    /// Requested token categories
    pub categories: Vec<TokenCategory>,
    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,
}

impl Task {
    /// Create task with a fresh identifier and normal priority
    #[must_use]
    pub fn new(image_url: impl Into<String>, categories: Vec<TokenCategory>) -> Self {
        Self {
            id: TaskId::new(),
            image_url: image_url.into(),
            categories,
            priority: Priority::Normal,
        }
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Requested categories without duplicates, in request order
    #[must_use]
    pub fn unique_categories(&self) -> Vec<TokenCategory> {
        let mut seen = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            if !seen.contains(category) {
                seen.push(*category);
            }
        }
        seen
    }
}

/// Supported image encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl ImageFormat {
    /// Canonical MIME type
    #[inline]
    #[must_use]
    pub const fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }

    /// Parse a `Content-Type` value, ignoring parameters and case
    #[must_use]
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/webp" => Some(ImageFormat::Webp),
            "image/gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Output of preprocessing; immutable once built
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedImage {
    /// Generated image identifier
    pub id: ImageId,
    /// Original source reference
    pub source_url: String,
    /// Fingerprint of the source reference (cache key)
    pub fingerprint: Fingerprint,
    /// Pixel width after enhancement
    pub width: u32,
    /// Pixel height after enhancement
    pub height: u32,
    /// Output encoding
    pub format: ImageFormat,
    /// Encoded size in bytes
    pub byte_size: usize,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Encoded pixels
    #[serde(skip)]
    pub data: Arc<[u8]>,
}

impl ProcessedImage {
    /// Encoded bytes
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Closed set of token values
///
/// Scalars cover hex colors, pixel dimensions and flags; maps and lists
/// cover composite values (shadows, typography, gradient stops).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<TokenValue>),
    Map(BTreeMap<String, TokenValue>),
}

impl TokenValue {
    /// Text payload, if scalar text
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TokenValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric payload, if scalar number
    #[inline]
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TokenValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Map payload, if structured
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, TokenValue>> {
        match self {
            TokenValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// List payload, if structured
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[TokenValue]> {
        match self {
            TokenValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Build a map value from key/value pairs
    #[must_use]
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TokenValue)>,
    {
        TokenValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Canonical string form used to compare values for equality.
    ///
    /// Numbers are rounded to `precision` so `16.0` and `16.004` compare
    /// equal at the default 0.01 precision; maps are ordered by key.
    #[must_use]
    pub fn canonical(&self, precision: f64) -> String {
        match self {
            TokenValue::Bool(b) => b.to_string(),
            TokenValue::Number(n) => {
                let step = if precision > 0.0 { precision } else { 0.01 };
                let rounded = (n / step).round() * step;
                format!("{rounded:.4}")
            }
            TokenValue::Text(s) => s.trim().to_ascii_lowercase(),
            TokenValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.canonical(precision)).collect();
                format!("[{}]", parts.join(","))
            }
            TokenValue::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.canonical(precision)))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }
}

impl From<&str> for TokenValue {
    fn from(value: &str) -> Self {
        TokenValue::Text(value.to_string())
    }
}

impl From<String> for TokenValue {
    fn from(value: String) -> Self {
        TokenValue::Text(value)
    }
}

impl From<f64> for TokenValue {
    fn from(value: f64) -> Self {
        TokenValue::Number(value)
    }
}

impl From<bool> for TokenValue {
    fn from(value: bool) -> Self {
        TokenValue::Bool(value)
    }
}

/// One token as reported by extraction for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCandidate {
    /// Token category
    pub category: TokenCategory,
    /// Token name (e.g. `primary-500`)
    pub name: String,
    /// Hierarchical path (e.g. `["color", "brand", "primary"]`)
    #[serde(default)]
    pub path: Vec<String>,
    /// Typed value
    pub value: TokenValue,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
    /// DTCG `$type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Human description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Reference to another token (alias)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Free-form extension metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
    /// Image this candidate was extracted from
    pub source_image: ImageId,
}

impl TokenCandidate {
    /// Create candidate with required fields
    #[must_use]
    pub fn new(
        category: TokenCategory,
        name: impl Into<String>,
        value: impl Into<TokenValue>,
        confidence: f64,
        source_image: ImageId,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            path: Vec::new(),
            value: value.into(),
            confidence,
            token_type: Some(category.dtcg_type().to_string()),
            description: None,
            reference: None,
            extensions: BTreeMap::new(),
            source_image,
        }
    }

    /// With hierarchical path
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One source image's contribution to a merged token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    /// Contributing image
    pub image_id: ImageId,
    /// Confidence of the contributing candidate
    pub confidence: f64,
}

/// Deduplicated token with provenance
///
/// Invariants: `sources` is non-empty and `confidence` is the mean of the
/// member confidences, within [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedToken {
    pub category: TokenCategory,
    pub name: String,
    #[serde(default)]
    pub path: Vec<String>,
    pub value: TokenValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
    /// Contributing candidates, one entry per member
    pub sources: Vec<SourceContribution>,
    /// Aggregate confidence (mean over members)
    pub confidence: f64,
}

impl MergedToken {
    /// Distinct contributing images, in first-seen order
    #[must_use]
    pub fn source_images(&self) -> Vec<ImageId> {
        let mut images = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if !images.contains(&source.image_id) {
                images.push(source.image_id);
            }
        }
        images
    }
}

/// Terminal artifact of the pipeline core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedToken {
    #[serde(flatten)]
    pub token: MergedToken,
    /// Structural validity
    pub is_valid: bool,
    /// Structural errors (empty when valid)
    pub errors: Vec<String>,
    /// Non-fatal findings
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Accessibility score in [0, 1]; `None` when not color-applicable
    pub accessibility_score: Option<f64>,
    /// Quality score in [0, 1]
    pub quality_score: f64,
    /// Weighted blend in [0, 1]
    pub overall_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in TokenCategory::ALL {
            assert_eq!(category.as_str().parse::<TokenCategory>().unwrap(), category);
        }
        assert!("borders".parse::<TokenCategory>().is_err());
    }

    #[test]
    fn task_deduplicates_categories() {
        let task = Task::new(
            "https://example.com/a.png",
            vec![TokenCategory::Color, TokenCategory::Spacing, TokenCategory::Color],
        );
        assert_eq!(
            task.unique_categories(),
            vec![TokenCategory::Color, TokenCategory::Spacing]
        );
    }

    #[test]
    fn priority_orders_critical_first() {
        let mut priorities = vec![Priority::Low, Priority::Critical, Priority::Normal];
        priorities.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities[0], Priority::Critical);
    }

    #[test]
    fn mime_parsing_ignores_parameters() {
        assert_eq!(ImageFormat::from_mime("image/PNG; charset=binary"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_mime("image/jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime("text/html"), None);
    }

    #[test]
    fn token_value_deserializes_untagged() {
        let value: TokenValue = serde_json::from_str(r##"{"color": "#000000", "blur": 4}"##).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["color"].as_text(), Some("#000000"));
        assert_eq!(map["blur"].as_number(), Some(4.0));
    }

    #[test]
    fn canonical_rounds_numbers() {
        assert_eq!(
            TokenValue::Number(16.0).canonical(0.01),
            TokenValue::Number(16.004).canonical(0.01)
        );
        assert_ne!(
            TokenValue::Number(16.0).canonical(0.01),
            TokenValue::Number(16.5).canonical(0.01)
        );
    }

    #[test]
    fn merged_token_lists_distinct_images() {
        let a = ImageId::new();
        let b = ImageId::new();
        let token = MergedToken {
            category: TokenCategory::Color,
            name: "primary".into(),
            path: vec![],
            value: "#FF0000".into(),
            token_type: None,
            description: None,
            reference: None,
            extensions: BTreeMap::new(),
            sources: vec![
                SourceContribution { image_id: a, confidence: 0.9 },
                SourceContribution { image_id: b, confidence: 0.8 },
                SourceContribution { image_id: a, confidence: 0.7 },
            ],
            confidence: 0.8,
        };
        assert_eq!(token.source_images(), vec![a, b]);
    }
}
