//! Structural metadata extraction.
//!
//! Works on both OpenAPI 3.x and Swagger 2.0 shaped documents. Every field
//! falls back to a default on its own, so extraction never fails.

use serde_json::Value;

use crate::models::SchemaMetadata;

pub fn extract_metadata(doc: &Value) -> SchemaMetadata {
    let open_api_version = doc
        .get("openapi")
        .and_then(scalar_text)
        .or_else(|| doc.get("swagger").and_then(scalar_text))
        .unwrap_or_else(|| "unknown".to_string());

    let info = doc.get("info");
    let title = info
        .and_then(|i| i.get("title"))
        .and_then(scalar_text)
        .unwrap_or_else(|| "Untitled API".to_string());
    let version = info
        .and_then(|i| i.get("version"))
        .and_then(scalar_text)
        .unwrap_or_else(|| "1.0.0".to_string());

    SchemaMetadata {
        open_api_version,
        title,
        version,
        servers: servers(doc),
        paths_count: key_count(doc.get("paths")),
        components_count: components_count(doc),
    }
}

fn servers(doc: &Value) -> Vec<String> {
    if let Some(list) = doc.get("servers").and_then(Value::as_array) {
        return list
            .iter()
            .filter_map(|s| s.get("url").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
    }

    // Swagger 2.0: host + schemes + basePath
    let Some(host) = doc.get("host").and_then(Value::as_str) else {
        return Vec::new();
    };
    let scheme = doc
        .get("schemes")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(Value::as_str)
        .unwrap_or("http");
    let base_path = doc.get("basePath").and_then(Value::as_str).unwrap_or("");
    vec![format!("{}://{}{}", scheme, host, base_path)]
}

fn components_count(doc: &Value) -> usize {
    match doc.get("components").and_then(|c| c.get("schemas")) {
        Some(schemas) if schemas.is_object() => key_count(Some(schemas)),
        _ => key_count(doc.get("definitions")),
    }
}

fn key_count(value: Option<&Value>) -> usize {
    value.and_then(Value::as_object).map_or(0, |m| m.len())
}

/// Strings as-is; numbers rendered as text (YAML reads `swagger: 2.0` as a float).
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
