//! Prompt-cache boundary hints for model families that need them.

use serde_json::{json, Map, Value};

const CACHE_CONTROL: &str = "cache_control";

/// Whether the model family requires explicit prompt-cache boundaries.
pub fn requires_cache_hints(model_id: &str) -> bool {
    let id = model_id.to_ascii_lowercase();
    id.contains("claude") || id.contains("anthropic")
}

fn boundary() -> Value {
    json!({"type": "ephemeral"})
}

/// Wrap text content in a cache-hinted content part list.
pub fn cache_hinted_text(text: &str) -> Value {
    json!([{"type": "text", "text": text, "cache_control": boundary()}])
}

/// Mark the most recent `user` and the most recent `tool` message with a
/// cache boundary, after clearing any boundary left on other messages.
///
/// Applying this twice leaves exactly one boundary per eligible role.
/// System messages keep their boundary.
pub fn apply_cache_boundaries(messages: &mut [Value]) {
    for message in messages.iter_mut() {
        if role_of(message) != Some("system") {
            strip_boundary(message);
        }
    }
    for role in ["user", "tool"] {
        if let Some(message) = messages.iter_mut().rev().find(|m| role_of(m) == Some(role)) {
            mark_boundary(message);
        }
    }
}

fn role_of(message: &Value) -> Option<&str> {
    message.get("role").and_then(Value::as_str)
}

fn strip_boundary(message: &mut Value) {
    if let Some(obj) = message.as_object_mut() {
        obj.remove(CACHE_CONTROL);
    }
    if let Some(parts) = message.get_mut("content").and_then(Value::as_array_mut) {
        for part in parts {
            if let Some(obj) = part.as_object_mut() {
                obj.remove(CACHE_CONTROL);
            }
        }
    }
}

fn mark_boundary(message: &mut Value) {
    let Some(obj) = message.as_object_mut() else {
        return;
    };
    match obj.get_mut("content") {
        Some(Value::String(text)) => {
            let text = std::mem::take(text);
            obj.insert("content".into(), cache_hinted_text(&text));
        }
        Some(Value::Array(parts)) if !parts.is_empty() => {
            if let Some(last) = parts.last_mut().and_then(Value::as_object_mut) {
                last.insert(CACHE_CONTROL.into(), boundary());
            }
        }
        _ => {
            let mut hint = Map::new();
            hint.insert("type".into(), Value::String("ephemeral".into()));
            obj.insert(CACHE_CONTROL.into(), Value::Object(hint));
        }
    }
}

/// Count the boundaries present in a message list.
pub fn count_boundaries(messages: &[Value]) -> usize {
    messages
        .iter()
        .map(|message| {
            let own = usize::from(message.get(CACHE_CONTROL).is_some());
            let parts = message
                .get("content")
                .and_then(Value::as_array)
                .map(|parts| parts.iter().filter(|p| p.get(CACHE_CONTROL).is_some()).count())
                .unwrap_or(0);
            own + parts
        })
        .sum()
}
