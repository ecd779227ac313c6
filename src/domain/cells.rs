//! Coercion of loosely typed spreadsheet cells.
//!
//! The sheet adapter hands back JSON values whose type depends on how a human
//! typed the cell: numbers can arrive as strings, booleans as `1`/`"TRUE"`, and
//! empty cells as `null` or `""`. These helpers normalize that once so parsing
//! code only deals with `Option<String>` and `Option<f64>`.

use serde_json::Value;

/// Trimmed text content of a cell, `None` for null or blank cells.
pub fn cell_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => format_number(number),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Numeric content of a cell.
///
/// `Ok(None)` for blank cells, `Err(raw)` when the cell holds text that is not
/// a finite number. A decimal comma (`"12,5"`) is accepted.
pub fn cell_number(value: Option<&Value>) -> Result<Option<f64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| number.to_string()),
        Some(other) => match cell_text(Some(other)) {
            None => Ok(None),
            Some(text) => parse_decimal(&text).map(Some).ok_or(text),
        },
    }
}

/// Boolean content of a cell; anything unrecognized reads as `false`.
pub fn cell_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        ),
        _ => false,
    }
}

/// Integer user identifier stored in a cell.
pub fn cell_user_id(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|n| n.is_finite() && n.fract() == 0.0)
                .map(|n| n as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn parse_decimal(text: &str) -> Option<f64> {
    let normalized: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn format_number(number: &serde_json::Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
            format!("{}", n as i64)
        }
        _ => number.to_string(),
    }
}
