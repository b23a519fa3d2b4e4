//! Helpers for reading and rendering values out of a dispatch payload.
//!
//! Paths are dot-separated key sequences into nested JSON objects. Rendering
//! follows the comparison rules shared by the rule operators and the mapping
//! filter: numbers print without trailing zeros and never in scientific
//! notation, lists join their rendered elements with a comma, and objects
//! have no string form at all.

use serde_json::{Number, Value};

/// Looks up a dot-separated path in a JSON object. An explicit `null` is a
/// present value and is returned as such.
pub fn get_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for key in path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Renders a scalar or list value to the string form used for comparisons.
/// Objects have no string form and yield `None`.
pub fn string_form(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(number_string(n)),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Option<Vec<String>> = items.iter().map(string_form).collect();
            Some(parts?.join(","))
        }
        Value::Object(_) => None,
    }
}

/// Renders a JSON number the way comparisons expect: integers verbatim,
/// floats via `f64`'s display (which drops trailing zeros and never falls
/// back to scientific notation).
pub fn number_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    n.as_f64().unwrap_or(f64::NAN).to_string()
}

/// Attempts to read a value as a real number: JSON numbers directly, strings
/// by parsing. Anything else is not numeric.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
