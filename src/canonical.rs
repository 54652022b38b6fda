//! Canonical serialization for change detection.
//!
//! Two documents are the same schema iff their canonical forms are equal.
//! Object keys are sorted at every depth; array order, scalar types, and
//! values are preserved.

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Nesting limit for canonicalization. Deeper documents are not compared.
///
/// Uploads never reach it: the JSON and YAML parsers refuse input nested
/// past 128 levels first. It only bounds recursion for values built in code.
pub const MAX_DEPTH: usize = 256;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("document nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Produces the canonical text of a document.
pub fn canonicalize(value: &Value) -> Result<String, CanonicalError> {
    let mut out = String::new();
    write_canonical(value, 0, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, depth: usize, out: &mut String) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::TooDeep(MAX_DEPTH));
    }
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a str into a JSON string literal cannot fail.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], depth + 1, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, depth + 1, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
    Ok(())
}

/// Reports whether `candidate` differs from `stored`.
///
/// If either side cannot be canonicalized the answer is `true`: a spurious
/// new version is preferred over silently dropping an update.
pub fn has_changed(candidate: &Value, stored: &Value) -> bool {
    match (canonicalize(candidate), canonicalize(stored)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

/// SHA-256 of the canonical form, hex encoded.
pub fn content_hash(value: &Value) -> Option<String> {
    let canonical = canonicalize(value).ok()?;
    Some(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(depth: usize) -> Value {
        let mut v = json!(1);
        for _ in 0..depth {
            v = json!({ "n": v });
        }
        v
    }

    #[test]
    fn test_object_key_order_ignored() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
        assert!(!has_changed(&a, &b));
        assert!(!has_changed(&b, &a));
    }

    #[test]
    fn test_nested_keys_sorted() {
        let v = json!({ "z": { "y": 1, "x": [ { "b": true, "a": null } ] }, "a": "s" });
        assert_eq!(
            canonicalize(&v).unwrap(),
            r#"{"a":"s","z":{"x":[{"a":null,"b":true}],"y":1}}"#
        );
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            canonicalize(&json!([1, 2])).unwrap(),
            canonicalize(&json!([2, 1])).unwrap()
        );
        assert!(has_changed(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn test_scalar_types_matter() {
        assert!(has_changed(&json!({ "v": 1 }), &json!({ "v": "1" })));
        assert!(has_changed(&json!({ "v": 1 }), &json!({ "v": 1.5 })));
        assert!(has_changed(&json!({ "v": null }), &json!({})));
    }

    #[test]
    fn test_keys_with_special_chars_are_escaped() {
        let v = json!({ "a\"b": 1 });
        assert_eq!(canonicalize(&v).unwrap(), r#"{"a\"b":1}"#);
    }

    #[test]
    fn test_too_deep_counts_as_changed() {
        let deep = nested(MAX_DEPTH + 5);
        assert_eq!(
            canonicalize(&deep),
            Err(CanonicalError::TooDeep(MAX_DEPTH))
        );
        assert!(has_changed(&deep, &deep));
        assert!(content_hash(&deep).is_none());
    }

    #[test]
    fn test_parsers_reject_nesting_before_limit() {
        let depth = MAX_DEPTH / 2 + 10;
        let text = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
        assert!(serde_json::from_str::<Value>(&text).is_err());
    }

    #[test]
    fn test_content_hash_stable_across_key_order() {
        let a = json!({ "info": { "title": "t", "version": "1" }, "paths": {} });
        let b = json!({ "paths": {}, "info": { "version": "1", "title": "t" } });
        let ha = content_hash(&a).unwrap();
        assert_eq!(ha.len(), 64);
        assert_eq!(Some(ha), content_hash(&b));
    }
}
