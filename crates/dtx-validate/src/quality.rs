//! Quality scoring
//!
//! `score = 0.5 * confidence + 0.3 * completeness + 0.2 * naming`
//!
//! Completeness: required fields (name, value, category, confidence) give
//! 0.60, recommended fields (type, path, description) up to 0.35, optional
//! fields (reference, extensions) up to 0.05.

use dtx_core::{MergedToken, TokenValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static KEBAB_CASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(?:-[a-z0-9]+)*$").expect("valid kebab-case pattern")
});

static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(?:[A-Z][a-z0-9]*)*$").expect("valid camelCase pattern")
});

static GENERIC_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:colou?r|spacing|space|shadow|font|text|typography|gradient|token|value|item|style|untitled|unnamed)?[-_]?\d*$",
    )
    .expect("valid generic-name pattern")
});

const REQUIRED_WEIGHT: f64 = 0.60;
const RECOMMENDED_WEIGHT: f64 = 0.35;
const OPTIONAL_WEIGHT: f64 = 0.05;

/// Whether a name carries no meaning (`color1`, `token-2`, `42`)
#[must_use]
pub fn is_generic_name(name: &str) -> bool {
    GENERIC_NAME.is_match(name.trim())
}

/// Score components
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityBreakdown {
    pub confidence: f64,
    pub completeness: f64,
    pub naming: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Quality score in [0, 1]
    #[must_use]
    pub fn score(&self, token: &MergedToken) -> f64 {
        self.breakdown(token).total
    }

    #[must_use]
    pub fn breakdown(&self, token: &MergedToken) -> QualityBreakdown {
        let confidence = token.confidence.clamp(0.0, 1.0);
        let completeness = self.completeness(token);
        let naming = self.naming(&token.name);
        let total = (0.5 * confidence + 0.3 * completeness + 0.2 * naming).clamp(0.0, 1.0);
        QualityBreakdown {
            confidence,
            completeness,
            naming,
            total,
        }
    }

    /// Field completeness in [0, 1]
    #[must_use]
    pub fn completeness(&self, token: &MergedToken) -> f64 {
        let has_value = match &token.value {
            TokenValue::Text(s) => !s.trim().is_empty(),
            TokenValue::List(items) => !items.is_empty(),
            TokenValue::Map(map) => !map.is_empty(),
            TokenValue::Number(n) => n.is_finite(),
            TokenValue::Bool(_) => true,
        };
        let required = [
            !token.name.trim().is_empty(),
            has_value,
            true,
            token.confidence.is_finite(),
        ];
        let recommended = [
            token.token_type.is_some(),
            !token.path.is_empty(),
            token.description.as_deref().is_some_and(|d| !d.trim().is_empty()),
        ];
        let optional = [token.reference.is_some(), !token.extensions.is_empty()];

        share(&required) * REQUIRED_WEIGHT
            + share(&recommended) * RECOMMENDED_WEIGHT
            + share(&optional) * OPTIONAL_WEIGHT
    }

    /// Naming quality in [0, 1]: 0.6 for kebab-case or camelCase, 0.4 for a
    /// non-generic name
    #[must_use]
    pub fn naming(&self, name: &str) -> f64 {
        let name = name.trim();
        if name.is_empty() {
            return 0.0;
        }
        let style = if KEBAB_CASE.is_match(name) || CAMEL_CASE.is_match(name) {
            0.6
        } else {
            0.2
        };
        let specificity = if is_generic_name(name) { 0.0 } else { 0.4 };
        style + specificity
    }
}

#[allow(clippy::cast_precision_loss)]
fn share(flags: &[bool]) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().filter(|f| **f).count() as f64 / flags.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_core::{ImageId, SourceContribution, TokenCategory};
    use std::collections::BTreeMap;

    #[test]
    fn naming_patterns_compile_and_match() {
        assert!(KEBAB_CASE.is_match("brand-primary-500"));
        assert!(!KEBAB_CASE.is_match("Brand_Primary"));
        assert!(CAMEL_CASE.is_match("brandPrimary"));
        assert!(GENERIC_NAME.is_match("color1"));
        assert!(!GENERIC_NAME.is_match("surface-raised"));
    }

    fn token(name: &str) -> MergedToken {
        MergedToken {
            category: TokenCategory::Color,
            name: name.into(),
            path: Vec::new(),
            value: "#FF0000".into(),
            token_type: None,
            description: None,
            reference: None,
            extensions: BTreeMap::new(),
            sources: vec![SourceContribution {
                image_id: ImageId::new(),
                confidence: 0.8,
            }],
            confidence: 0.8,
        }
    }

    #[test]
    fn required_fields_alone_give_baseline() {
        let scorer = QualityScorer::new();
        assert!((scorer.completeness(&token("primary")) - 0.60).abs() < 1e-12);
    }

    #[test]
    fn full_token_is_complete() {
        let mut t = token("primary-500");
        t.token_type = Some("color".into());
        t.path = vec!["color".into(), "primary-500".into()];
        t.description = Some("brand".into());
        t.reference = Some("{color.red}".into());
        t.extensions.insert("role".into(), serde_json::Value::Null);
        assert!((QualityScorer::new().completeness(&t) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn generic_names_are_penalized() {
        let scorer = QualityScorer::new();
        assert!(scorer.naming("primary-500") > scorer.naming("color1"));
        assert!(scorer.naming("brandPrimary") > scorer.naming("Brand Primary"));
        assert_eq!(scorer.naming(""), 0.0);
        for name in ["color1", "color-2", "token", "42", "Colour_3"] {
            assert!(is_generic_name(name), "{name}");
        }
        for name in ["primary", "surface-raised", "color-primary"] {
            assert!(!is_generic_name(name), "{name}");
        }
    }

    #[test]
    fn score_blends_components() {
        let b = QualityScorer::new().breakdown(&token("primary"));
        let expected = 0.5 * 0.8 + 0.3 * 0.6 + 0.2 * 1.0;
        assert!((b.total - expected).abs() < 1e-12);
    }
}
