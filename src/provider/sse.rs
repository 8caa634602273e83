//! Folding streamed chat-completion chunks into one completion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::stream::{extract_reasoning_delta, extract_text_delta, usage_from_value};
use crate::types::{NormalizedUsage, ToolCall};
use crate::util::json::{parse_arguments, str_field};

/// The assembled result of a streamed chat completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
    pub reasoning: String,
    pub reasoning_details: Vec<Value>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<NormalizedUsage>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates `choices[].delta` fields across chunks. Tool calls are
/// assembled by their streamed `index`.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    completion: ChatCompletion,
    tool_calls: BTreeMap<u64, PartialToolCall>,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one parsed chunk.
    pub fn push(&mut self, chunk: &Value) {
        if let Some(text) = extract_text_delta(chunk) {
            self.completion.content.push_str(&text);
        }
        if let Some(reasoning) = extract_reasoning_delta(chunk) {
            self.completion.reasoning.push_str(&reasoning);
        }
        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()).and_then(usage_from_value) {
            self.completion.usage = Some(usage);
        }

        let Some(choice) = first_choice(chunk) else {
            return;
        };
        if let Some(reason) = str_field(choice, &["finish_reason"]) {
            self.completion.finish_reason = Some(reason.to_string());
        }
        let Some(delta) = choice.get("delta") else {
            return;
        };
        if let Some(details) = delta.get("reasoning_details").and_then(Value::as_array) {
            self.completion.reasoning_details.extend(details.iter().cloned());
        }
        for (position, call) in delta
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            let index = call
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(position as u64);
            let entry = self.tool_calls.entry(index).or_default();
            if let Some(id) = str_field(call, &["id"]) {
                entry.id = id.to_string();
            }
            if let Some(function) = call.get("function") {
                if let Some(name) = str_field(function, &["name"]) {
                    entry.name.push_str(name);
                }
                if let Some(arguments) = str_field(function, &["arguments"]) {
                    entry.arguments.push_str(arguments);
                }
            }
        }
    }

    /// Finish accumulation. Tool call arguments that do not parse are kept
    /// as the raw string.
    pub fn finish(mut self) -> ChatCompletion {
        self.completion.tool_calls = self
            .tool_calls
            .into_values()
            .map(|partial| {
                let raw = Value::String(partial.arguments);
                ToolCall {
                    arguments: parse_arguments(&raw).unwrap_or(raw),
                    call_id: partial.id,
                    name: partial.name,
                }
            })
            .collect();
        self.completion
    }
}

fn first_choice(chunk: &Value) -> Option<&Value> {
    match chunk.get("choices")? {
        Value::Array(choices) => choices.first(),
        Value::Object(keyed) => keyed.get("0").or_else(|| keyed.values().next()),
        _ => None,
    }
}
