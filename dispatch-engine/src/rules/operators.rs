//! The leaf predicate library.
//!
//! Comparison rules, which the rest of the engine depends on precisely:
//! equality tries a numeric comparison first and only falls back to string
//! comparison when either side fails to parse as a number; string predicates
//! require both a present value and a filter argument, refuse object-shaped
//! values, and see lists as their elements joined with a comma; ordering
//! predicates refuse unparseable operands outright and are false on NaN.

use serde_json::Value;

use super::{Condition, RuleError};
use crate::payload;

pub fn apply(condition: &Condition, document: &Value) -> Result<bool, RuleError> {
    let value = payload::get_path(document, &condition.variable);
    let filter = condition.filter.as_deref();

    match condition.operator.as_str() {
        // Presence only - an explicit null is a defined value.
        "defined" => Ok(value.is_some()),
        "notdefined" => Ok(value.is_none()),

        "empty" => Ok(is_empty(required(value, &condition.variable)?)),
        "notempty" => Ok(!is_empty(required(value, &condition.variable)?)),

        op @ "equals" => equals(condition, value, filter, op, false),
        op @ "equals_ignore_case" => equals(condition, value, filter, op, true),
        op @ "does_not_equal" => Ok(!equals(condition, value, filter, op, false)?),
        op @ "does_not_equal_ignore_case" => Ok(!equals(condition, value, filter, op, true)?),

        op @ "starts_with" => matched(condition, value, filter, op, false, starts_with),
        op @ "starts_with_ignore_case" => {
            matched(condition, value, filter, op, true, starts_with)
        }
        op @ "does_not_start_with" => {
            Ok(!matched(condition, value, filter, op, false, starts_with)?)
        }
        op @ "does_not_start_with_ignore_case" => {
            Ok(!matched(condition, value, filter, op, true, starts_with)?)
        }

        op @ "ends_with" => matched(condition, value, filter, op, false, ends_with),
        op @ "ends_with_ignore_case" => matched(condition, value, filter, op, true, ends_with),
        op @ "does_not_end_with" => {
            Ok(!matched(condition, value, filter, op, false, ends_with)?)
        }
        op @ "does_not_end_with_ignore_case" => {
            Ok(!matched(condition, value, filter, op, true, ends_with)?)
        }

        op @ "contains" => matched(condition, value, filter, op, false, contains),
        op @ "contains_ignore_case" => matched(condition, value, filter, op, true, contains),
        op @ "does_not_contain" => Ok(!matched(condition, value, filter, op, false, contains)?),
        op @ "does_not_contain_ignore_case" => {
            Ok(!matched(condition, value, filter, op, true, contains)?)
        }

        op @ "greater_than" => ordered(condition, value, filter, op, |a, b| a > b),
        op @ "greater_than_equal_to" => ordered(condition, value, filter, op, |a, b| a >= b),
        op @ "less_than" => ordered(condition, value, filter, op, |a, b| a < b),
        op @ "less_than_equal_to" => ordered(condition, value, filter, op, |a, b| a <= b),

        op @ "regular_expression" => regex_match(condition, value, filter, op),

        other => Err(RuleError::UnknownOperator(other.to_string())),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(entries) => entries.is_empty(),
        // Numbers and booleans are never empty.
        Value::Number(_) | Value::Bool(_) => false,
    }
}

fn equals(
    condition: &Condition,
    value: Option<&Value>,
    filter: Option<&str>,
    operator: &str,
    ignore_case: bool,
) -> Result<bool, RuleError> {
    let value = required(value, &condition.variable)?;
    let filter = required_filter(filter, operator)?;

    // Numeric comparison first; string comparison only when either side
    // fails to parse as a number.
    if let (Some(lhs), Ok(rhs)) = (payload::as_number(value), filter.trim().parse::<f64>()) {
        return Ok(lhs == rhs);
    }

    let lhs = rendered(value, operator)?;
    if ignore_case {
        Ok(lhs.to_lowercase() == filter.to_lowercase())
    } else {
        Ok(lhs == filter)
    }
}

fn matched(
    condition: &Condition,
    value: Option<&Value>,
    filter: Option<&str>,
    operator: &str,
    ignore_case: bool,
    test: fn(&str, &str) -> bool,
) -> Result<bool, RuleError> {
    let value = required(value, &condition.variable)?;
    let filter = required_filter(filter, operator)?;
    let lhs = rendered(value, operator)?;
    if ignore_case {
        Ok(test(&lhs.to_lowercase(), &filter.to_lowercase()))
    } else {
        Ok(test(&lhs, filter))
    }
}

fn ordered(
    condition: &Condition,
    value: Option<&Value>,
    filter: Option<&str>,
    operator: &str,
    compare: fn(f64, f64) -> bool,
) -> Result<bool, RuleError> {
    let value = required(value, &condition.variable)?;
    let filter = required_filter(filter, operator)?;

    let lhs = payload::as_number(value).ok_or_else(|| RuleError::NotANumber {
        operator: operator.to_string(),
        value: value.to_string(),
    })?;
    let rhs = filter
        .trim()
        .parse::<f64>()
        .map_err(|_| RuleError::NotANumber {
            operator: operator.to_string(),
            value: filter.to_string(),
        })?;

    if lhs.is_nan() || rhs.is_nan() {
        return Ok(false);
    }
    Ok(compare(lhs, rhs))
}

fn regex_match(
    condition: &Condition,
    value: Option<&Value>,
    filter: Option<&str>,
    operator: &str,
) -> Result<bool, RuleError> {
    let value = required(value, &condition.variable)?;
    let pattern = required_filter(filter, operator)?;
    let regex = regex::Regex::new(pattern).map_err(|e| RuleError::BadRegex {
        pattern: pattern.to_string(),
        source: Box::new(e),
    })?;
    Ok(regex.is_match(&rendered(value, operator)?))
}

// Thin wrappers so the predicates share one fn-pointer shape; the `str`
// methods themselves are generic over the pattern and do not coerce.
fn starts_with(haystack: &str, needle: &str) -> bool {
    haystack.starts_with(needle)
}

fn ends_with(haystack: &str, needle: &str) -> bool {
    haystack.ends_with(needle)
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.contains(needle)
}

fn required<'a>(value: Option<&'a Value>, variable: &str) -> Result<&'a Value, RuleError> {
    value.ok_or_else(|| RuleError::MissingValue(variable.to_string()))
}

fn required_filter<'a>(filter: Option<&'a str>, operator: &str) -> Result<&'a str, RuleError> {
    filter.ok_or_else(|| RuleError::MissingFilter(operator.to_string()))
}

fn rendered(value: &Value, operator: &str) -> Result<String, RuleError> {
    payload::string_form(value).ok_or_else(|| RuleError::UnsupportedShape {
        operator: operator.to_string(),
        shape: "object",
    })
}
