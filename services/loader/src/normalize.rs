//! Locale-tolerant value normalization
//!
//! Source cells are human-entered: thousands separators in either locale,
//! currency symbols, stray whitespace, numbers stored as text. Every function
//! here is total. A cell that cannot be read degrades to `None`; it never
//! aborts the row or the run.

use serde_json::Value;

/// Parse an integer (years, counts).
///
/// JSON integers pass through. Strings keep only their digits and a leading
/// minus sign, so `"Tahun 2021"` and `"2.021"` both read as 2021.
pub fn normalize_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            let f = n.as_f64()?;
            if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Some(f as i64)
            } else {
                None
            }
        }
        Value::String(s) => parse_int_str(s),
        _ => None,
    }
}

/// Parse a decimal observation. See [`parse_float_str`] for the text rules.
pub fn normalize_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_float_str(s),
        _ => None,
    }
}

/// Trim a text cell. Empty text, null, arrays and objects become `None`;
/// numbers and booleans are rendered.
pub fn clean_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_str(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn clean_str(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_int_str(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    let negative = trimmed.starts_with('-');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let n: i64 = digits.parse().ok()?;
    Some(if negative { -n } else { n })
}

/// Parse a decimal from free text.
///
/// Only digits, `.`, `,` and `-` survive. When both separators appear the
/// last one is the decimal point. A lone separator kind is a thousands
/// separator if it repeats, or if exactly three digits follow it and the
/// integer part is non-zero (`"1.200"` is 1200, `"0.125"` stays 0.125).
pub fn parse_float_str(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    let negative = cleaned.starts_with('-');
    let body: String = cleaned.chars().filter(|c| *c != '-').collect();
    if !body.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let decimal = match (body.rfind('.'), body.rfind(',')) {
        (Some(dot), Some(comma)) => Some(if dot > comma { '.' } else { ',' }),
        (Some(_), None) => lone_separator_as_decimal(&body, '.'),
        (None, Some(_)) => lone_separator_as_decimal(&body, ','),
        (None, None) => None,
    };

    let normalized: String = body
        .chars()
        .filter_map(|c| match c {
            '.' | ',' if Some(c) == decimal => Some('.'),
            '.' | ',' => None,
            other => Some(other),
        })
        .collect();

    let parsed: f64 = normalized.parse().ok()?;
    let signed = if negative { -parsed } else { parsed };
    signed.is_finite().then_some(signed)
}

fn lone_separator_as_decimal(body: &str, sep: char) -> Option<char> {
    if body.matches(sep).count() > 1 {
        return None;
    }
    let (int_part, frac_part) = body.split_once(sep)?;
    let grouped = frac_part.len() == 3 && !int_part.trim_start_matches('0').is_empty();
    if grouped {
        None
    } else {
        Some(sep)
    }
}
