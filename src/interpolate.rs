//! Placeholder interpolation for JSON fixtures.
//!
//! Fixture documents may contain `${name}` tokens in any string member.
//! Interpolation replaces them with values from a dictionary, usually the
//! regex groups captured when a route matched. A string that starts with
//! [`NUMBER_MARKER`] after substitution is turned into a JSON integer, so a
//! fixture can carry `"$[number]${count}"` and still produce a number.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Prefix that turns an interpolated string into an integer.
pub const NUMBER_MARKER: &str = "$[number]";

/// Replacement text for a placeholder with no dictionary entry.
const UNDEFINED: &str = "undefined";

/// Values available to `${name}` placeholders.
pub type Dictionary = HashMap<String, String>;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").unwrap())
}

/// Interpolate `value` in place and return it.
///
/// Strings get their placeholders substituted, objects and arrays are
/// walked recursively, every other value is left untouched.
pub fn interpolate<'a>(value: &'a mut Value, values: &Dictionary) -> &'a mut Value {
    match value {
        Value::String(template) => {
            let interpolated = interpolate_str(template, values);
            *value = interpolated;
        }
        Value::Object(members) => {
            for member in members.values_mut() {
                interpolate(member, values);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                interpolate(item, values);
            }
        }
        _ => {}
    }
    value
}

/// Interpolate a single string template.
pub fn interpolate_str(template: &str, values: &Dictionary) -> Value {
    let replaced = placeholder_regex().replace_all(template, |caps: &Captures| {
        values
            .get(&caps[1])
            .map(String::as_str)
            .unwrap_or(UNDEFINED)
            .to_string()
    });
    interpolate_type(&replaced)
}

fn interpolate_type(text: &str) -> Value {
    match text.strip_prefix(NUMBER_MARKER) {
        Some(rest) => parse_int(rest),
        None => Value::String(text.to_string()),
    }
}

/// Parse the leading integer of `text`.
///
/// Leading whitespace and a sign are accepted, parsing stops at the first
/// non-digit. Without any digit the result is NaN, which JSON renders as
/// `null`.
fn parse_int(text: &str) -> Value {
    let trimmed = text.trim_start();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_len = unsigned
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return Value::Null;
    }
    let digits = &unsigned[..digits_len];

    if let Ok(n) = digits.parse::<i64>() {
        return Value::from(if negative { -n } else { n });
    }
    // Beyond i64: keep the magnitude as a float.
    digits
        .parse::<f64>()
        .ok()
        .and_then(|n| serde_json::Number::from_f64(if negative { -n } else { n }))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Left-pad a purely numeric id with zeros up to `length` characters.
///
/// Non-numeric ids and ids already at least `length` long are returned
/// unchanged.
pub fn pad_numeric_id(id: &str, length: usize) -> String {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return id.to_string();
    }
    let padding = length.saturating_sub(id.len());
    format!("{}{}", "0".repeat(padding), id)
}
