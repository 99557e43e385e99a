//! Key-name transform at the REST boundary. Records travel with snake_case
//! keys; browser-style clients send camelCase.

use serde_json::{Map, Value};

/// `jobTitle` → `job_title`. Every uppercase letter becomes `_` + lowercase.
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `job_title` → `jobTitle`. Inverse of [`camel_to_snake`] on keys it produced.
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Rewrites every object key in `value`, recursing into arrays and objects.
pub fn transform_keys(value: Value, f: fn(&str) -> String) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(|v| transform_keys(v, f)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                out.insert(f(&key), transform_keys(v, f));
            }
            Value::Object(out)
        }
        other => other,
    }
}
