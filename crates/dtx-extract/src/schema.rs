//! Structured-output contracts, one per token category
//!
//! Payload types are the source of truth: their JSON Schema (via schemars)
//! is sent to the analysis service and enforced with jsonschema on the way
//! back, before deserialization. Unknown fields are rejected.

use crate::error::ExtractionError;
use dtx_core::{ImageId, TokenCandidate, TokenCategory, TokenValue};
use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Color entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ColorEntry {
    /// Token name, kebab-case (e.g. `primary-500`)
    pub name: String,
    /// Hex color, `#RRGGBB` or `#RRGGBBAA`
    pub hex: String,
    /// Usage role (e.g. `primary`, `background`, `text`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ColorPayload {
    pub colors: Vec<ColorEntry>,
}

/// Spacing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SpacingEntry {
    pub name: String,
    /// Size in pixels
    pub value_px: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SpacingPayload {
    pub spacing: Vec<SpacingEntry>,
}

/// Shadow entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ShadowEntry {
    pub name: String,
    pub offset_x: f64,
    pub offset_y: f64,
    pub blur: f64,
    #[serde(default)]
    pub spread: f64,
    /// Hex shadow color
    pub color: String,
    #[serde(default)]
    pub inset: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ShadowPayload {
    pub shadows: Vec<ShadowEntry>,
}

/// Typography entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TypographyEntry {
    pub name: String,
    pub font_family: String,
    /// Size in pixels
    pub font_size: f64,
    pub font_weight: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub letter_spacing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TypographyPayload {
    pub typography: Vec<TypographyEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GradientKind {
    Linear,
    Radial,
    Conic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GradientStop {
    pub color: String,
    /// Position along the gradient in [0, 1]
    #[schemars(range(min = 0.0, max = 1.0))]
    pub position: f64,
}

/// Gradient entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GradientEntry {
    pub name: String,
    pub kind: GradientKind,
    /// Angle in degrees (linear gradients)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
    pub stops: Vec<GradientStop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GradientPayload {
    pub gradients: Vec<GradientEntry>,
}

/// JSON Schema for a category's response
#[must_use]
pub fn response_schema(category: TokenCategory) -> Value {
    let root = match category {
        TokenCategory::Color => schemars::schema_for!(ColorPayload),
        TokenCategory::Spacing => schemars::schema_for!(SpacingPayload),
        TokenCategory::Shadow => schemars::schema_for!(ShadowPayload),
        TokenCategory::Typography => schemars::schema_for!(TypographyPayload),
        TokenCategory::Gradient => schemars::schema_for!(GradientPayload),
    };
    serde_json::to_value(root).unwrap_or(Value::Null)
}

/// Wire form of a response schema for strict structured output
///
/// Every object closes with `additionalProperties: false` and lists all of
/// its properties as required (optional fields are already nullable).
/// Keywords strict mode does not accept (`format`, `default`) are dropped
/// and draft-07 `definitions` move to `$defs`.
#[must_use]
pub fn strict_schema(schema: &Value) -> Value {
    let mut wire = schema.clone();
    if let Value::Object(root) = &mut wire {
        root.remove("$schema");
        if let Some(definitions) = root.remove("definitions") {
            root.insert("$defs".into(), definitions);
        }
    }
    tighten(&mut wire);
    wire
}

fn tighten(node: &mut Value) {
    match node {
        Value::Object(map) => {
            map.remove("format");
            map.remove("default");
            if let Some(Value::String(target)) = map.get_mut("$ref") {
                if let Some(name) = target.strip_prefix("#/definitions/") {
                    *target = format!("#/$defs/{name}");
                }
            }
            if let Some(Value::Object(properties)) = map.get("properties") {
                let required = properties.keys().cloned().map(Value::String).collect();
                map.insert("required".into(), Value::Array(required));
                map.insert("additionalProperties".into(), Value::Bool(false));
            }
            for (keyword, child) in map.iter_mut() {
                match (keyword.as_str(), child) {
                    ("properties" | "$defs", Value::Object(named)) => named.values_mut().for_each(tighten),
                    (_, child) => tighten(child),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(tighten),
        _ => {}
    }
}

/// Instructions sent alongside the image
#[must_use]
pub fn instructions(category: TokenCategory) -> &'static str {
    match category {
        TokenCategory::Color => {
            "Identify the distinct colors of this interface. Report each as a hex value with a \
             kebab-case name, its usage role when evident, and your confidence."
        }
        TokenCategory::Spacing => {
            "Identify the recurring spacing values (padding, margins, gaps) in pixels, each with \
             a kebab-case name and your confidence."
        }
        TokenCategory::Shadow => {
            "Identify the box shadows used, with offsets, blur, spread in pixels, hex color, \
             whether inset, a kebab-case name and your confidence."
        }
        TokenCategory::Typography => {
            "Identify the text styles: font family, size in pixels, weight, line height and \
             letter spacing when visible, a kebab-case name and your confidence."
        }
        TokenCategory::Gradient => {
            "Identify the gradients: kind, angle, ordered color stops with positions in [0, 1], \
             a kebab-case name and your confidence."
        }
    }
}

/// Compiled schemas for every category
pub struct SchemaRegistry {
    documents: BTreeMap<TokenCategory, Value>,
    compiled: BTreeMap<TokenCategory, JSONSchema>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("categories", &self.documents.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaRegistry {
    /// Generate and compile all category schemas
    ///
    /// # Errors
    /// Returns [`ExtractionError::SchemaInvalid`] if a generated schema
    /// does not compile.
    pub fn new() -> Result<Self, ExtractionError> {
        let mut documents = BTreeMap::new();
        let mut compiled = BTreeMap::new();
        for category in TokenCategory::ALL {
            let document = response_schema(category);
            let schema = JSONSchema::compile(&document)
                .map_err(|e| ExtractionError::SchemaInvalid(format!("{category} schema: {e}")))?;
            compiled.insert(category, schema);
            documents.insert(category, document);
        }
        Ok(Self { documents, compiled })
    }

    /// Schema document sent to the service
    #[must_use]
    pub fn document(&self, category: TokenCategory) -> Option<&Value> {
        self.documents.get(&category)
    }

    /// Validate a response and convert it into candidates
    ///
    /// # Errors
    /// Returns [`ExtractionError::SchemaInvalid`] listing the violations.
    pub fn parse(
        &self,
        category: TokenCategory,
        response: Value,
        image: ImageId,
    ) -> Result<Vec<TokenCandidate>, ExtractionError> {
        let schema = self
            .compiled
            .get(&category)
            .ok_or_else(|| ExtractionError::SchemaInvalid(format!("no schema for {category}")))?;
        if let Err(errors) = schema.validate(&response) {
            let details: Vec<String> = errors
                .take(5)
                .map(|e| format!("{}: {e}", e.instance_path))
                .collect();
            return Err(ExtractionError::SchemaInvalid(details.join("; ")));
        }
        let invalid = |e: serde_json::Error| ExtractionError::SchemaInvalid(e.to_string());
        let candidates = match category {
            TokenCategory::Color => serde_json::from_value::<ColorPayload>(response)
                .map_err(invalid)?
                .colors
                .into_iter()
                .map(|entry| color_candidate(entry, image))
                .collect(),
            TokenCategory::Spacing => serde_json::from_value::<SpacingPayload>(response)
                .map_err(invalid)?
                .spacing
                .into_iter()
                .map(|entry| spacing_candidate(entry, image))
                .collect(),
            TokenCategory::Shadow => serde_json::from_value::<ShadowPayload>(response)
                .map_err(invalid)?
                .shadows
                .into_iter()
                .map(|entry| shadow_candidate(entry, image))
                .collect(),
            TokenCategory::Typography => serde_json::from_value::<TypographyPayload>(response)
                .map_err(invalid)?
                .typography
                .into_iter()
                .map(|entry| typography_candidate(entry, image))
                .collect(),
            TokenCategory::Gradient => serde_json::from_value::<GradientPayload>(response)
                .map_err(invalid)?
                .gradients
                .into_iter()
                .map(|entry| gradient_candidate(entry, image))
                .collect(),
        };
        Ok(candidates)
    }
}

fn path_for(category: TokenCategory, group: Option<&str>, name: &str) -> Vec<String> {
    let mut path = vec![category.as_str().to_string()];
    if let Some(group) = group.map(str::trim).filter(|g| !g.is_empty() && *g != name) {
        path.push(group.to_string());
    }
    path.push(name.to_string());
    path
}

fn finish(mut candidate: TokenCandidate, group: Option<&str>, description: Option<String>) -> TokenCandidate {
    candidate.path = path_for(candidate.category, group, &candidate.name);
    candidate.description = description;
    candidate
}

fn color_candidate(entry: ColorEntry, image: ImageId) -> TokenCandidate {
    let mut candidate = TokenCandidate::new(
        TokenCategory::Color,
        entry.name.trim(),
        entry.hex.trim(),
        entry.confidence,
        image,
    );
    if let Some(role) = &entry.role {
        candidate
            .extensions
            .insert("role".into(), Value::String(role.clone()));
    }
    finish(candidate, entry.role.as_deref(), entry.description)
}

fn spacing_candidate(entry: SpacingEntry, image: ImageId) -> TokenCandidate {
    let candidate = TokenCandidate::new(
        TokenCategory::Spacing,
        entry.name.trim(),
        entry.value_px,
        entry.confidence,
        image,
    );
    finish(candidate, None, entry.description)
}

fn shadow_candidate(entry: ShadowEntry, image: ImageId) -> TokenCandidate {
    let value = TokenValue::map([
        ("offsetX", TokenValue::Number(entry.offset_x)),
        ("offsetY", TokenValue::Number(entry.offset_y)),
        ("blur", TokenValue::Number(entry.blur)),
        ("spread", TokenValue::Number(entry.spread)),
        ("color", TokenValue::Text(entry.color.trim().to_string())),
        ("inset", TokenValue::Bool(entry.inset)),
    ]);
    let candidate = TokenCandidate::new(
        TokenCategory::Shadow,
        entry.name.trim(),
        value,
        entry.confidence,
        image,
    );
    finish(candidate, None, entry.description)
}

fn typography_candidate(entry: TypographyEntry, image: ImageId) -> TokenCandidate {
    let mut fields = vec![
        ("fontFamily", TokenValue::Text(entry.font_family.trim().to_string())),
        ("fontSize", TokenValue::Number(entry.font_size)),
        ("fontWeight", TokenValue::Number(f64::from(entry.font_weight))),
    ];
    if let Some(line_height) = entry.line_height {
        fields.push(("lineHeight", TokenValue::Number(line_height)));
    }
    if let Some(letter_spacing) = entry.letter_spacing {
        fields.push(("letterSpacing", TokenValue::Number(letter_spacing)));
    }
    let candidate = TokenCandidate::new(
        TokenCategory::Typography,
        entry.name.trim(),
        TokenValue::map(fields),
        entry.confidence,
        image,
    );
    finish(candidate, None, entry.description)
}

fn gradient_candidate(entry: GradientEntry, image: ImageId) -> TokenCandidate {
    let kind = match entry.kind {
        GradientKind::Linear => "linear",
        GradientKind::Radial => "radial",
        GradientKind::Conic => "conic",
    };
    let stops = entry
        .stops
        .iter()
        .map(|stop| {
            TokenValue::map([
                ("color", TokenValue::Text(stop.color.trim().to_string())),
                ("position", TokenValue::Number(stop.position)),
            ])
        })
        .collect();
    let mut fields = vec![
        ("kind", TokenValue::Text(kind.to_string())),
        ("stops", TokenValue::List(stops)),
    ];
    if let Some(angle) = entry.angle {
        fields.push(("angle", TokenValue::Number(angle)));
    }
    let candidate = TokenCandidate::new(
        TokenCategory::Gradient,
        entry.name.trim(),
        TokenValue::map(fields),
        entry.confidence,
        image,
    );
    finish(candidate, None, entry.description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn color_response_becomes_candidates() {
        let registry = SchemaRegistry::new().unwrap();
        let image = ImageId::new();
        let candidates = registry
            .parse(
                TokenCategory::Color,
                json!({"colors": [{"name": "primary-500", "hex": "#FF0000", "role": "primary", "confidence": 0.9}]}),
                image,
            )
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let red = &candidates[0];
        assert_eq!(red.value, TokenValue::Text("#FF0000".into()));
        assert_eq!(red.path, vec!["color", "primary", "primary-500"]);
        assert_eq!(red.token_type.as_deref(), Some("color"));
        assert_eq!(red.source_image, image);
    }

    fn walk<'a>(node: &'a Value, out: &mut Vec<&'a serde_json::Map<String, Value>>) {
        match node {
            Value::Object(map) => {
                out.push(map);
                map.values().for_each(|child| walk(child, out));
            }
            Value::Array(items) => items.iter().for_each(|child| walk(child, out)),
            _ => {}
        }
    }

    #[test]
    fn strict_schema_closes_and_requires_every_object() {
        for category in TokenCategory::ALL {
            let wire = strict_schema(&response_schema(category));
            let rendered = wire.to_string();
            assert!(!rendered.contains("#/definitions/"), "{category}");
            assert!(wire.get("definitions").is_none());

            let mut nodes = Vec::new();
            walk(&wire, &mut nodes);
            for node in nodes {
                let Some(Value::Object(properties)) = node.get("properties") else {
                    continue;
                };
                assert_eq!(node["additionalProperties"], json!(false), "{category}");
                let mut required: Vec<&str> = node["required"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter_map(Value::as_str)
                    .collect();
                required.sort_unstable();
                let mut keys: Vec<&str> = properties.keys().map(String::as_str).collect();
                keys.sort_unstable();
                assert_eq!(required, keys, "{category}");
                for field in properties.values() {
                    assert!(field.get("format").is_none() && field.get("default").is_none(), "{category}");
                }
            }
        }
    }

    #[test]
    fn strict_wire_schema_accepts_nulls_for_optional_fields() {
        let wire = strict_schema(&response_schema(TokenCategory::Color));
        let compiled = JSONSchema::compile(&wire).unwrap();
        let response = json!({"colors": [{
            "name": "primary",
            "hex": "#0B57D0",
            "role": null,
            "description": null,
            "confidence": 0.8
        }]});
        assert!(compiled.is_valid(&response));
        assert!(!compiled.is_valid(&json!({"colors": [{"name": "primary", "hex": "#0B57D0", "confidence": 0.8}]})));

        let candidates = SchemaRegistry::new()
            .unwrap()
            .parse(TokenCategory::Color, response, ImageId::new())
            .unwrap();
        assert_eq!(candidates[0].description, None);
    }

    #[test]
    fn unknown_fields_fail_validation() {
        let registry = SchemaRegistry::new().unwrap();
        let err = registry
            .parse(
                TokenCategory::Color,
                json!({"colors": [{"name": "a", "hex": "#000000", "confidence": 0.5, "extra": true}]}),
                ImageId::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ExtractionError::SchemaInvalid(_)));
    }

    #[test]
    fn missing_or_out_of_range_fields_fail_validation() {
        let registry = SchemaRegistry::new().unwrap();
        for response in [
            json!({"colours": []}),
            json!({"colors": [{"name": "a", "hex": "#000000"}]}),
            json!({"colors": [{"name": "a", "hex": "#000000", "confidence": 1.5}]}),
            json!("the primary color is red"),
        ] {
            assert!(
                registry.parse(TokenCategory::Color, response.clone(), ImageId::new()).is_err(),
                "{response}"
            );
        }
    }

    #[test]
    fn spacing_and_shadow_values_are_structured() {
        let registry = SchemaRegistry::new().unwrap();
        let spacing = registry
            .parse(
                TokenCategory::Spacing,
                json!({"spacing": [{"name": "md", "value_px": 16, "confidence": 0.8}]}),
                ImageId::new(),
            )
            .unwrap();
        assert_eq!(spacing[0].value, TokenValue::Number(16.0));

        let shadow = registry
            .parse(
                TokenCategory::Shadow,
                json!({"shadows": [{"name": "card", "offset_x": 0, "offset_y": 2, "blur": 8, "color": "#00000033", "confidence": 0.7}]}),
                ImageId::new(),
            )
            .unwrap();
        let map = shadow[0].value.as_map().unwrap();
        assert_eq!(map["blur"], TokenValue::Number(8.0));
        assert_eq!(map["inset"], TokenValue::Bool(false));
    }

    #[test]
    fn gradient_stops_keep_order() {
        let registry = SchemaRegistry::new().unwrap();
        let gradients = registry
            .parse(
                TokenCategory::Gradient,
                json!({"gradients": [{
                    "name": "hero",
                    "kind": "linear",
                    "angle": 90,
                    "stops": [{"color": "#FF0000", "position": 0}, {"color": "#0000FF", "position": 1}],
                    "confidence": 0.6
                }]}),
                ImageId::new(),
            )
            .unwrap();
        let stops = gradients[0].value.as_map().unwrap()["stops"].as_list().unwrap();
        assert_eq!(stops[0].as_map().unwrap()["color"], TokenValue::Text("#FF0000".into()));
    }

    #[test]
    fn every_category_has_a_document() {
        let registry = SchemaRegistry::new().unwrap();
        for category in TokenCategory::ALL {
            assert!(registry.document(category).is_some());
        }
    }
}
