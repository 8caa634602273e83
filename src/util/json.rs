//! Field probing over `serde_json::Value` for provider payloads whose shape
//! is not known in advance.

use serde_json::Value;

/// Sub-fields that may hold text when a delta is an object or a part list.
const TEXT_FIELDS: [&str; 4] = ["text", "value", "content", "delta"];

/// First string value found under any of `keys`.
pub fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
}

/// First non-null value found under any of `keys`.
pub fn any_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()))
}

/// First unsigned integer found under any of `keys`.
pub fn u64_field(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| {
        value.get(*key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        })
    })
}

/// Coerce a scalar, part list, or nested object into text.
///
/// Arrays concatenate the text of each element; objects are probed through
/// `text`, `value`, `content`, `delta` in that order. Returns `None` when
/// nothing textual is found or the result is empty.
pub fn coerce_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().filter_map(coerce_text).collect::<String>(),
        Value::Object(_) => TEXT_FIELDS
            .iter()
            .find_map(|field| value.get(*field).and_then(coerce_text))?,
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Unwrap run-item envelopes (`raw_item` / `rawItem`) to the provider item.
pub fn unwrap_raw_item(value: &Value) -> &Value {
    any_field(value, &["raw_item", "rawItem"])
        .filter(|inner| inner.is_object())
        .unwrap_or(value)
}

/// Parse arguments that may arrive as a JSON-encoded string or a structured
/// value. `Err` carries the raw string when it is not valid JSON.
pub fn parse_arguments(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(Value::Object(Default::default()));
            }
            serde_json::from_str(trimmed).map_err(|_| raw.clone())
        }
        other => Ok(other.clone()),
    }
}
