//! Document parsing and structural validation.
//!
//! Raw upload bytes are parsed according to their declared format into a
//! JSON value. YAML is parsed into its own value tree first and converted, so
//! that non-string mapping keys (`200:` under `responses`) survive as text.
//!
//! Validation goes through the [`StructuralValidator`] trait so the ruleset
//! can be swapped. [`OpenApiValidator`] is the bundled implementation.

use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use crate::error::{RegistryError, Result};
use crate::models::SchemaFormat;

/// Capability that accepts or rejects a parsed document.
///
/// On rejection the returned message is surfaced to the caller verbatim.
#[async_trait]
pub trait StructuralValidator: Send + Sync {
    async fn validate(&self, document: &Value) -> std::result::Result<(), String>;
}

/// Parses raw bytes in the given format.
pub fn parse_document(bytes: &[u8], format: SchemaFormat) -> Result<Value> {
    let parsed = match format {
        SchemaFormat::Json => serde_json::from_slice::<Value>(bytes).map_err(|e| e.to_string()),
        SchemaFormat::Yaml => serde_yaml::from_slice::<serde_yaml::Value>(bytes)
            .and_then(|mut value| {
                // `<<: *anchor` merge keys are expanded before conversion.
                value.apply_merge()?;
                Ok(value)
            })
            .map_err(|e| e.to_string())
            .and_then(yaml_to_json),
    };
    parsed.map_err(|e| {
        RegistryError::validation(
            format!("Schema validation failed: invalid {}", format.as_str()),
            e,
        )
    })
}

fn yaml_to_json(value: serde_yaml::Value) -> std::result::Result<Value, String> {
    use serde_yaml::Value as Y;
    Ok(match value {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                Value::Number(
                    Number::from_f64(f).ok_or_else(|| format!("non-finite number: {}", n))?,
                )
            }
        }
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<std::result::Result<_, _>>()?,
        ),
        Y::Mapping(mapping) => {
            let mut map = Map::with_capacity(mapping.len());
            for (k, v) in mapping {
                map.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(map)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_key(key: serde_yaml::Value) -> std::result::Result<String, String> {
    use serde_yaml::Value as Y;
    match key {
        Y::String(s) => Ok(s),
        Y::Number(n) => Ok(n.to_string()),
        Y::Bool(b) => Ok(b.to_string()),
        Y::Null => Ok("null".to_string()),
        other => Err(format!("unsupported mapping key: {:?}", other)),
    }
}

const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Swagger2,
    OpenApi30,
    OpenApi31,
}

/// Structural rules for Swagger 2.0 and OpenAPI 3.0 / 3.1 documents.
///
/// Checks the version marker, the `info` object, and the shape of `paths`
/// down to the operation level. `$ref` targets are not resolved.
#[derive(Debug, Default, Clone)]
pub struct OpenApiValidator;

impl OpenApiValidator {
    pub fn new() -> Self {
        Self
    }

    fn check(&self, doc: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(root) = doc.as_object() else {
            return vec!["document root must be an object".to_string()];
        };

        let dialect = match (root.get("swagger"), root.get("openapi")) {
            (Some(v), _) => match v {
                Value::String(s) if s == "2.0" => Some(Dialect::Swagger2),
                Value::Number(n) if n.as_f64() == Some(2.0) => Some(Dialect::Swagger2),
                _ => {
                    errors.push(format!("unsupported swagger version: {}", v));
                    None
                }
            },
            (None, Some(Value::String(s))) if s.starts_with("3.0") => Some(Dialect::OpenApi30),
            (None, Some(Value::String(s))) if s.starts_with("3.1") => Some(Dialect::OpenApi31),
            (None, Some(v)) => {
                errors.push(format!("unsupported openapi version: {}", v));
                None
            }
            (None, None) => {
                errors.push("missing 'openapi' or 'swagger' version field".to_string());
                None
            }
        };

        match root.get("info").and_then(Value::as_object) {
            None => errors.push("missing required object 'info'".to_string()),
            Some(info) => {
                if !info.get("title").is_some_and(Value::is_string) {
                    errors.push("info.title is required and must be a string".to_string());
                }
                if !info
                    .get("version")
                    .is_some_and(|v| v.is_string() || v.is_number())
                {
                    errors.push("info.version is required".to_string());
                }
            }
        }

        match root.get("paths") {
            Some(paths) => check_paths(paths, dialect, &mut errors),
            None if dialect == Some(Dialect::OpenApi31) => {
                if !root.contains_key("components") && !root.contains_key("webhooks") {
                    errors.push(
                        "openapi 3.1 documents need at least one of 'paths', 'components', 'webhooks'"
                            .to_string(),
                    );
                }
            }
            None => errors.push("missing required object 'paths'".to_string()),
        }

        errors
    }
}

fn check_paths(paths: &Value, dialect: Option<Dialect>, errors: &mut Vec<String>) {
    let Some(paths) = paths.as_object() else {
        errors.push("'paths' must be an object".to_string());
        return;
    };
    for (path, item) in paths {
        if path.starts_with("x-") {
            continue;
        }
        if !path.starts_with('/') {
            errors.push(format!("path '{}' must begin with '/'", path));
            continue;
        }
        let Some(item) = item.as_object() else {
            errors.push(format!("path item '{}' must be an object", path));
            continue;
        };
        for method in HTTP_METHODS {
            let Some(op) = item.get(*method) else {
                continue;
            };
            let Some(op) = op.as_object() else {
                errors.push(format!("operation {} {} must be an object", method, path));
                continue;
            };
            let responses_required = dialect != Some(Dialect::OpenApi31);
            if responses_required && !op.get("responses").is_some_and(Value::is_object) {
                errors.push(format!("operation {} {} is missing 'responses'", method, path));
            }
        }
    }
}

#[async_trait]
impl StructuralValidator for OpenApiValidator {
    async fn validate(&self, document: &Value) -> std::result::Result<(), String> {
        let errors = self.check(document);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}
