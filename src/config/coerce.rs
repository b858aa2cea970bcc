//! Conversion of raw configuration text into typed values.
//!
//! Values coming from the environment are plain strings. They are converted
//! by trying, in order: boolean literal, integer, float. Anything else stays
//! a string. The conversion never fails.

use serde_json::{Number, Value};

/// Convert raw text to the first type it parses as.
pub fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        // NaN and infinities are not representable in JSON
        if let Some(number) = Number::from_f64(float) {
            return Value::Number(number);
        }
    }

    Value::String(raw.to_string())
}

/// Render a value for humans: strings without quotes, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
