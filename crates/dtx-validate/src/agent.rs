//! Validation agent
//!
//! Structural checks run first; a token with structural issues is invalid
//! and is not scored. Valid tokens get a quality score, color tokens also
//! an accessibility score against the rest of the palette, and
//! `overall = 0.4 * accessibility + 0.4 * quality + 0.2 * error_factor`.
//! Tokens without an accessibility score use `(0.4 * quality + 0.2 *
//! error_factor) / 0.6`.

use crate::accessibility::{AccessibilityCalculator, AA_NORMAL};
use crate::error::{StructuralIssue, ValidationError};
use crate::quality::{is_generic_name, QualityScorer};
use dtx_core::{
    MergedToken, Rgb, TokenCategory, TokenValue, ValidatedToken, ValidationConfig, ValidationMode,
};
use std::collections::BTreeMap;

fn number(
    map: &BTreeMap<String, TokenValue>,
    field: &'static str,
    issues: &mut Vec<StructuralIssue>,
) -> Option<f64> {
    match map.get(field) {
        None => {
            issues.push(StructuralIssue::MissingField(field));
            None
        }
        Some(TokenValue::Number(n)) if n.is_finite() => Some(*n),
        Some(_) => {
            issues.push(StructuralIssue::ExpectedNumber(field));
            None
        }
    }
}

fn hex(value: Option<&TokenValue>, field: &'static str, issues: &mut Vec<StructuralIssue>) {
    match value {
        None => issues.push(StructuralIssue::MissingField(field)),
        Some(TokenValue::Text(s)) if Rgb::is_hex(s) => {}
        Some(TokenValue::Text(s)) => issues.push(StructuralIssue::InvalidHex(s.clone())),
        Some(_) => issues.push(StructuralIssue::ExpectedText(field)),
    }
}

fn expect_map<'a>(
    value: &'a TokenValue,
    issues: &mut Vec<StructuralIssue>,
) -> Option<&'a BTreeMap<String, TokenValue>> {
    let map = value.as_map();
    if map.is_none() {
        issues.push(StructuralIssue::MissingField("structured value"));
    }
    map
}

/// Structural issues of one token; empty when valid
#[must_use]
pub fn check_structure(token: &MergedToken) -> Vec<StructuralIssue> {
    let mut issues = Vec::new();
    if token.name.trim().is_empty() {
        issues.push(StructuralIssue::EmptyName);
    }
    match token.category {
        TokenCategory::Color => hex(Some(&token.value), "value", &mut issues),
        TokenCategory::Spacing => match token.value {
            TokenValue::Number(n) if n.is_finite() && n > 0.0 => {}
            TokenValue::Number(n) => issues.push(StructuralIssue::NonPositive { field: "value", value: n }),
            _ => issues.push(StructuralIssue::ExpectedNumber("value")),
        },
        TokenCategory::Shadow => {
            if let Some(map) = expect_map(&token.value, &mut issues) {
                number(map, "offsetX", &mut issues);
                number(map, "offsetY", &mut issues);
                if let Some(blur) = number(map, "blur", &mut issues) {
                    if blur < 0.0 {
                        issues.push(StructuralIssue::Negative { field: "blur", value: blur });
                    }
                }
                hex(map.get("color"), "color", &mut issues);
            }
        }
        TokenCategory::Typography => {
            if let Some(map) = expect_map(&token.value, &mut issues) {
                match map.get("fontFamily") {
                    Some(TokenValue::Text(s)) if !s.trim().is_empty() => {}
                    Some(TokenValue::Text(_)) | None => issues.push(StructuralIssue::MissingField("fontFamily")),
                    Some(_) => issues.push(StructuralIssue::ExpectedText("fontFamily")),
                }
                if let Some(size) = number(map, "fontSize", &mut issues) {
                    if size <= 0.0 {
                        issues.push(StructuralIssue::NonPositive { field: "fontSize", value: size });
                    }
                }
                if let Some(weight) = number(map, "fontWeight", &mut issues) {
                    if !(1.0..=1000.0).contains(&weight) {
                        issues.push(StructuralIssue::OutOfRange {
                            field: "fontWeight",
                            value: weight,
                            min: 1.0,
                            max: 1000.0,
                        });
                    }
                }
            }
        }
        TokenCategory::Gradient => {
            if let Some(map) = expect_map(&token.value, &mut issues) {
                let stops = map.get("stops").and_then(TokenValue::as_list).unwrap_or_default();
                if stops.len() < 2 {
                    issues.push(StructuralIssue::TooFewStops(stops.len()));
                }
                for stop in stops {
                    let Some(stop) = stop.as_map() else {
                        issues.push(StructuralIssue::MissingField("stop"));
                        continue;
                    };
                    hex(stop.get("color"), "stop color", &mut issues);
                    if let Some(position) = number(stop, "position", &mut issues) {
                        if !(0.0..=1.0).contains(&position) {
                            issues.push(StructuralIssue::OutOfRange {
                                field: "position",
                                value: position,
                                min: 0.0,
                                max: 1.0,
                            });
                        }
                    }
                }
            }
        }
    }
    issues
}

fn color_of(token: &MergedToken) -> Option<Rgb> {
    if token.category != TokenCategory::Color {
        return None;
    }
    token.value.as_text().and_then(|s| s.parse().ok())
}

/// Blend of the component scores, clamped to [0, 1]
#[must_use]
pub fn overall_score(accessibility: Option<f64>, quality: f64, has_warnings: bool) -> f64 {
    let error_factor = if has_warnings { 0.5 } else { 1.0 };
    let overall = match accessibility {
        Some(a) => 0.4 * a + 0.4 * quality + 0.2 * error_factor,
        None => (0.4 * quality + 0.2 * error_factor) / 0.6,
    };
    overall.clamp(0.0, 1.0)
}

/// Composes structural checks, accessibility and quality scoring
#[derive(Debug, Clone, Default)]
pub struct ValidationAgent {
    config: ValidationConfig,
    accessibility: AccessibilityCalculator,
    quality: QualityScorer,
}

impl ValidationAgent {
    #[must_use]
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// With operating mode
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.config.mode = mode;
        self
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> ValidationMode {
        self.config.mode
    }

    /// Validate and score a token set
    ///
    /// In strict mode invalid tokens are dropped; in lenient mode they are
    /// kept with their errors and zero scores.
    ///
    /// # Errors
    /// Returns [`ValidationError::NonFiniteScore`] if scoring produced NaN.
    pub fn validate(&self, tokens: Vec<MergedToken>) -> Result<Vec<ValidatedToken>, ValidationError> {
        let checked: Vec<(MergedToken, Vec<StructuralIssue>)> = tokens
            .into_iter()
            .map(|token| {
                let issues = check_structure(&token);
                (token, issues)
            })
            .collect();
        let palette: Vec<Rgb> = checked
            .iter()
            .filter(|(_, issues)| issues.is_empty())
            .filter_map(|(token, _)| color_of(token))
            .collect();

        let total = checked.len();
        let mut output = Vec::with_capacity(total);
        for (token, issues) in checked {
            if !issues.is_empty() && self.config.mode == ValidationMode::Strict {
                tracing::debug!(name = %token.name, issues = issues.len(), "dropping invalid token");
                continue;
            }
            output.push(self.score(token, &issues, &palette)?);
        }
        let invalid = output.iter().filter(|t| !t.is_valid).count();
        tracing::info!(
            tokens = total,
            kept = output.len(),
            invalid,
            mode = %self.config.mode,
            "validation complete"
        );
        Ok(output)
    }

    /// Validate one token against a palette of valid colors
    ///
    /// # Errors
    /// Returns [`ValidationError::NonFiniteScore`] if scoring produced NaN.
    pub fn validate_token(&self, token: MergedToken, palette: &[Rgb]) -> Result<ValidatedToken, ValidationError> {
        let issues = check_structure(&token);
        self.score(token, &issues, palette)
    }

    fn score(
        &self,
        token: MergedToken,
        issues: &[StructuralIssue],
        palette: &[Rgb],
    ) -> Result<ValidatedToken, ValidationError> {
        if !issues.is_empty() {
            return Ok(ValidatedToken {
                token,
                is_valid: false,
                errors: issues.iter().map(ToString::to_string).collect(),
                warnings: Vec::new(),
                accessibility_score: None,
                quality_score: 0.0,
                overall_score: 0.0,
            });
        }

        let color = color_of(&token);
        let warnings = self.warnings(&token, color);
        let accessibility_score = color.map(|c| self.accessibility.color_score(c, palette));
        let quality_score = self.quality.score(&token);
        let overall_score = overall_score(accessibility_score, quality_score, !warnings.is_empty());

        let finite = quality_score.is_finite()
            && overall_score.is_finite()
            && accessibility_score.map_or(true, f64::is_finite);
        if !finite {
            return Err(ValidationError::NonFiniteScore { name: token.name });
        }
        Ok(ValidatedToken {
            token,
            is_valid: true,
            errors: Vec::new(),
            warnings,
            accessibility_score,
            quality_score,
            overall_score,
        })
    }

    fn warnings(&self, token: &MergedToken, color: Option<Rgb>) -> Vec<String> {
        let mut warnings = Vec::new();
        if token.confidence < self.config.low_confidence_threshold {
            warnings.push(format!(
                "low confidence {:.2} below {:.2}",
                token.confidence, self.config.low_confidence_threshold
            ));
        }
        if is_generic_name(&token.name) {
            warnings.push(format!("generic name '{}'", token.name));
        }
        if token.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
            warnings.push("missing description".to_string());
        }
        if let Some(color) = color {
            if color.is_translucent() {
                warnings.push(format!("translucent color {color}"));
            }
            let best = self.accessibility.best_contrast(color);
            if best < AA_NORMAL {
                warnings.push(format!("fails AA contrast on white and black (best {best:.2}:1)"));
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_core::{ImageId, SourceContribution};
    use pretty_assertions::assert_eq;

    fn token(category: TokenCategory, name: &str, value: TokenValue) -> MergedToken {
        MergedToken {
            category,
            name: name.into(),
            path: vec![category.as_str().into(), name.into()],
            value,
            token_type: Some(category.dtcg_type().into()),
            description: Some("from screenshot".into()),
            reference: None,
            extensions: BTreeMap::new(),
            sources: vec![SourceContribution {
                image_id: ImageId::new(),
                confidence: 0.9,
            }],
            confidence: 0.9,
        }
    }

    #[test]
    fn valid_color_is_scored() {
        let out = ValidationAgent::default()
            .validate(vec![token(TokenCategory::Color, "primary", "#0B57D0".into())])
            .unwrap();
        let t = &out[0];
        assert!(t.is_valid);
        assert!(t.errors.is_empty());
        assert!(t.warnings.is_empty());
        let a = t.accessibility_score.unwrap();
        assert!((0.0..=1.0).contains(&a));
        assert!((t.overall_score - (0.4 * a + 0.4 * t.quality_score + 0.2)).abs() < 1e-12);
    }

    #[test]
    fn bad_hex_short_circuits() {
        let out = ValidationAgent::default()
            .validate(vec![token(TokenCategory::Color, "primary", "blue".into())])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_valid);
        assert_eq!(out[0].errors, vec!["'blue' is not a hex color".to_string()]);
        assert_eq!(out[0].accessibility_score, None);
        assert_eq!(out[0].overall_score, 0.0);
    }

    #[test]
    fn strict_mode_drops_invalid_tokens() {
        let agent = ValidationAgent::default().with_mode(ValidationMode::Strict);
        let out = agent
            .validate(vec![
                token(TokenCategory::Spacing, "md", TokenValue::Number(-4.0)),
                token(TokenCategory::Spacing, "lg", TokenValue::Number(24.0)),
                token(TokenCategory::Color, "", "#000000".into()),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token.name, "lg");
        assert_eq!(out[0].accessibility_score, None);
    }

    #[test]
    fn warnings_halve_error_factor() {
        let mut t = token(TokenCategory::Spacing, "space1", TokenValue::Number(8.0));
        t.confidence = 0.2;
        t.description = None;
        let out = ValidationAgent::default().validate(vec![t]).unwrap();
        let v = &out[0];
        assert!(v.is_valid);
        assert_eq!(v.warnings.len(), 3);
        let expected = (0.4 * v.quality_score + 0.2 * 0.5) / 0.6;
        assert!((v.overall_score - expected).abs() < 1e-12);
    }

    #[test]
    fn structured_values_are_checked() {
        let shadow = TokenValue::map([
            ("offsetX", TokenValue::Number(0.0)),
            ("offsetY", TokenValue::Number(2.0)),
            ("blur", TokenValue::Number(-1.0)),
            ("color", TokenValue::Text("#00000033".into())),
        ]);
        let issues = check_structure(&token(TokenCategory::Shadow, "card", shadow));
        assert_eq!(issues, vec![StructuralIssue::Negative { field: "blur", value: -1.0 }]);

        let gradient = TokenValue::map([(
            "stops",
            TokenValue::List(vec![TokenValue::map([
                ("color", TokenValue::Text("#FF0000".into())),
                ("position", TokenValue::Number(1.5)),
            ])]),
        )]);
        let issues = check_structure(&token(TokenCategory::Gradient, "hero", gradient));
        assert_eq!(issues.len(), 2);

        let typography = TokenValue::map([
            ("fontFamily", TokenValue::Text("Inter".into())),
            ("fontSize", TokenValue::Number(16.0)),
            ("fontWeight", TokenValue::Number(400.0)),
        ]);
        assert!(check_structure(&token(TokenCategory::Typography, "body", typography)).is_empty());
    }

    #[test]
    fn scores_stay_in_unit_range() {
        let out = ValidationAgent::default()
            .validate(vec![
                token(TokenCategory::Color, "red", "#FF0000".into()),
                token(TokenCategory::Color, "green", "#00FF00".into()),
                token(TokenCategory::Color, "ghost", "#FFFFFF08".into()),
            ])
            .unwrap();
        for t in &out {
            assert!((0.0..=1.0).contains(&t.overall_score));
            assert!((0.0..=1.0).contains(&t.quality_score));
        }
        assert!(out[2].warnings.iter().any(|w| w.starts_with("translucent")));
    }
}
