//! DTCG export
//!
//! Renders validated tokens as a W3C Design Tokens Community Group document:
//! groups nested by token path, leaves carrying `$value`, `$type`,
//! `$description` and a `$extensions` entry with scores and provenance.

use crate::types::{TokenCategory, TokenValue, ValidatedToken};
use serde_json::{json, Map, Value};

/// Extension namespace for pipeline metadata
pub const EXTENSION_KEY: &str = "dev.dtx";

/// Render tokens as a DTCG JSON document.
///
/// Tokens without a path are placed under `<category>.<name>`. A token whose
/// path collides with an existing token or group gets a numeric suffix.
#[must_use]
pub fn to_dtcg(tokens: &[ValidatedToken]) -> Value {
    let mut root = Map::new();
    for token in tokens {
        let mut path = token_path(token);
        let Some(leaf) = path.pop() else { continue };
        insert_at(&mut root, &path, &leaf, leaf_value(token));
    }
    Value::Object(root)
}

fn token_path(token: &ValidatedToken) -> Vec<String> {
    let inner = &token.token;
    let mut path: Vec<String> = inner
        .path
        .iter()
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.is_empty() && !segment.starts_with('$'))
        .collect();
    if path.is_empty() {
        path.push(inner.category.as_str().to_string());
    }
    let name = inner.name.trim();
    if path.last().map(String::as_str) != Some(name) && !name.is_empty() {
        path.push(name.to_string());
    }
    path
}

fn insert_at(group: &mut Map<String, Value>, path: &[String], leaf: &str, value: Value) {
    match path.split_first() {
        None => {
            let key = free_key(group, leaf);
            group.insert(key, value);
        }
        Some((segment, rest)) => {
            // A token already sitting at this segment moves the group aside
            let key = match group.get(segment) {
                Some(Value::Object(existing)) if !existing.contains_key("$value") => {
                    segment.clone()
                }
                Some(_) => free_key(group, segment),
                None => segment.clone(),
            };
            let child = group
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = child {
                insert_at(map, rest, leaf, value);
            }
        }
    }
}

fn free_key(group: &Map<String, Value>, base: &str) -> String {
    if !group.contains_key(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !group.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn leaf_value(token: &ValidatedToken) -> Value {
    let inner = &token.token;
    let mut leaf = Map::new();
    leaf.insert("$value".into(), dtcg_value(inner.category, &inner.value));
    let token_type = inner
        .token_type
        .clone()
        .unwrap_or_else(|| inner.category.dtcg_type().to_string());
    leaf.insert("$type".into(), Value::String(token_type));
    if let Some(description) = &inner.description {
        leaf.insert("$description".into(), Value::String(description.clone()));
    }

    let sources: Vec<Value> = inner
        .sources
        .iter()
        .map(|s| json!({ "image": s.image_id.to_string(), "confidence": s.confidence }))
        .collect();
    let mut meta = json!({
        "category": inner.category.as_str(),
        "confidence": inner.confidence,
        "qualityScore": token.quality_score,
        "accessibilityScore": token.accessibility_score,
        "overallScore": token.overall_score,
        "isValid": token.is_valid,
        "sources": sources,
    });
    if let Value::Object(meta_map) = &mut meta {
        if let Some(reference) = &inner.reference {
            meta_map.insert("reference".into(), Value::String(reference.clone()));
        }
        if !token.errors.is_empty() {
            meta_map.insert("errors".into(), json!(token.errors));
        }
        if !token.warnings.is_empty() {
            meta_map.insert("warnings".into(), json!(token.warnings));
        }
    }

    let mut extensions: Map<String, Value> = inner
        .extensions
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    extensions.insert(EXTENSION_KEY.into(), meta);
    leaf.insert("$extensions".into(), Value::Object(extensions));
    Value::Object(leaf)
}

/// Convert a token value to its DTCG form; bare spacing numbers become `px`
/// dimensions, everything else serializes as-is.
fn dtcg_value(category: TokenCategory, value: &TokenValue) -> Value {
    match (category, value) {
        (TokenCategory::Spacing, TokenValue::Number(n)) => Value::String(format!("{n}px")),
        _ => serde_json::to_value(value).unwrap_or(Value::Null),
    }
}
