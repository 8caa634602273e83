//! Canonical history to chat-completions wire messages, for providers that
//! do not thread conversations server-side.

use serde_json::{json, Map, Value};

use super::cache::{apply_cache_boundaries, cache_hinted_text, requires_cache_hints};
use crate::types::{HistoryItem, ToolCall};

/// Build the ordered wire message array for one request.
///
/// Consecutive `user`, `assistant` and `system` messages are merged; `tool`
/// messages never are, since each answers its own call id. Standalone
/// reasoning blocks are carried onto the next assistant message that has no
/// `reasoning_details` of its own. Cache boundaries are re-applied on every
/// call for model families that need them.
pub fn build_wire_messages<'a>(
    history: impl IntoIterator<Item = &'a HistoryItem>,
    system_prompt: Option<&str>,
    model_id: &str,
) -> Vec<Value> {
    let cache_hints = requires_cache_hints(model_id);
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        let content = if cache_hints {
            cache_hinted_text(system)
        } else {
            Value::String(system.to_string())
        };
        messages.push(json!({"role": "system", "content": content}));
    }

    let mut pending_reasoning: Vec<Value> = Vec::new();
    for item in history {
        let mut message = match item {
            HistoryItem::Reasoning { details } => {
                pending_reasoning.extend(details.iter().cloned());
                continue;
            }
            HistoryItem::User { text } => json!({"role": "user", "content": text}),
            HistoryItem::Assistant {
                text,
                reasoning,
                reasoning_details,
                tool_calls,
            } => assistant_message(text, reasoning.as_deref(), reasoning_details.as_deref(), tool_calls),
            HistoryItem::ToolCall(call) => assistant_message("", None, None, std::slice::from_ref(call)),
            HistoryItem::ToolResult { call_id, output } => {
                json!({"role": "tool", "tool_call_id": call_id, "content": output})
            }
        };
        if role_of(&message) == Some("assistant") && !pending_reasoning.is_empty() {
            let details = std::mem::take(&mut pending_reasoning);
            if let Some(obj) = message.as_object_mut() {
                obj.entry("reasoning_details").or_insert(Value::Array(details));
            }
        }
        push_merged(&mut messages, message);
    }

    if cache_hints {
        apply_cache_boundaries(&mut messages);
    }
    messages
}

fn assistant_message(
    text: &str,
    reasoning: Option<&str>,
    reasoning_details: Option<&[Value]>,
    tool_calls: &[ToolCall],
) -> Value {
    let mut obj = Map::new();
    obj.insert("role".into(), "assistant".into());
    obj.insert(
        "content".into(),
        if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        },
    );
    if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
        obj.insert("reasoning".into(), reasoning.into());
    }
    if let Some(details) = reasoning_details.filter(|d| !d.is_empty()) {
        obj.insert("reasoning_details".into(), Value::Array(details.to_vec()));
    }
    if !tool_calls.is_empty() {
        obj.insert(
            "tool_calls".into(),
            Value::Array(tool_calls.iter().map(wire_tool_call).collect()),
        );
    }
    Value::Object(obj)
}

/// Chat-completions `tool_calls[]` entry. Arguments are always sent as a
/// JSON-encoded string.
pub fn wire_tool_call(call: &ToolCall) -> Value {
    let arguments = match &call.arguments {
        Value::String(raw) => raw.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    };
    json!({
        "id": call.call_id,
        "type": "function",
        "function": {"name": call.name, "arguments": arguments},
    })
}

fn role_of(message: &Value) -> Option<&str> {
    message.get("role").and_then(Value::as_str)
}

fn push_merged(messages: &mut Vec<Value>, message: Value) {
    let role = role_of(&message).unwrap_or_default().to_string();
    let mergeable = matches!(role.as_str(), "user" | "assistant" | "system");
    match messages.last_mut() {
        Some(last) if mergeable && role_of(last) == Some(role.as_str()) => {
            let separator = if role == "assistant" { "\n" } else { "\n\n" };
            merge_into(last, message, separator);
        }
        _ => messages.push(message),
    }
}

fn merge_into(target: &mut Value, source: Value, separator: &str) {
    let (Some(target), Value::Object(mut source)) = (target.as_object_mut(), source) else {
        return;
    };

    let content = merge_content(
        target.remove("content").unwrap_or(Value::Null),
        source.remove("content").unwrap_or(Value::Null),
        separator,
    );
    target.insert("content".into(), content);

    if let Some(Value::Array(calls)) = source.remove("tool_calls") {
        append_array(target, "tool_calls", calls);
    }
    if let Some(Value::Array(details)) = source.remove("reasoning_details") {
        append_array(target, "reasoning_details", details);
    }
    if let Some(Value::String(reasoning)) = source.remove("reasoning") {
        let merged = match target.get("reasoning").and_then(Value::as_str) {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{reasoning}"),
            _ => reasoning,
        };
        target.insert("reasoning".into(), merged.into());
    }
}

fn append_array(target: &mut Map<String, Value>, key: &str, items: Vec<Value>) {
    match target.get_mut(key) {
        Some(Value::Array(existing)) => existing.extend(items),
        _ => {
            target.insert(key.to_string(), Value::Array(items));
        }
    }
}

fn merge_content(existing: Value, incoming: Value, separator: &str) -> Value {
    match (existing, incoming) {
        (Value::Null, other) | (other, Value::Null) => other,
        (Value::String(a), Value::String(b)) => Value::String(format!("{a}{separator}{b}")),
        (a, b) => {
            let mut parts = into_parts(a);
            parts.extend(into_parts(b));
            Value::Array(parts)
        }
    }
}

fn into_parts(content: Value) -> Vec<Value> {
    match content {
        Value::Array(parts) => parts,
        Value::String(text) => vec![json!({"type": "text", "text": text})],
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
