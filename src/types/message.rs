//! Canonical conversation history items.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::json::{any_field, coerce_text, str_field, unwrap_raw_item};

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// Raw arguments: a JSON-encoded string or a structured value.
    pub arguments: Value,
}

/// One entry of the local canonical history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryItem {
    User {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_details: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolCall(ToolCall),
    ToolResult {
        call_id: String,
        output: String,
    },
    /// Opaque provider-signed reasoning continuation payload.
    Reasoning {
        details: Vec<Value>,
    },
}

impl HistoryItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: text.into(),
            reasoning: None,
            reasoning_details: None,
            tool_calls: Vec::new(),
        }
    }

    /// Call id carried by tool call / tool result items.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall(call) => Some(&call.call_id),
            Self::ToolResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Convert a raw runtime item into a history item.
    ///
    /// Understands the Responses-style item kinds (`message`,
    /// `function_call`, `function_call_result`/`function_call_output`,
    /// `reasoning`) and bare `{role, content}` chat messages. Unknown items
    /// yield `None`.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let item = unwrap_raw_item(raw);
        let kind = str_field(item, &["type"]).unwrap_or("message");
        match kind {
            "function_call" | "tool_call" => {
                let call_id = str_field(item, &["call_id", "callId", "id"])?.to_string();
                let name = str_field(item, &["name", "tool_name"]).unwrap_or("unknown");
                Some(Self::ToolCall(ToolCall {
                    call_id,
                    name: name.to_string(),
                    arguments: any_field(item, &["arguments", "args"])
                        .cloned()
                        .unwrap_or(Value::Null),
                }))
            }
            "function_call_result" | "function_call_output" | "tool_result" => {
                let call_id = str_field(item, &["call_id", "callId", "tool_call_id"])?.to_string();
                let output = item
                    .get("output")
                    .and_then(coerce_text)
                    .unwrap_or_default();
                Some(Self::ToolResult { call_id, output })
            }
            "reasoning" => {
                let details = match any_field(item, &["reasoning_details", "details"]) {
                    Some(Value::Array(details)) => details.clone(),
                    _ => vec![item.clone()],
                };
                Some(Self::Reasoning { details })
            }
            "message" => {
                let text = item.get("content").and_then(coerce_text).unwrap_or_default();
                match str_field(item, &["role"]) {
                    Some("user") => Some(Self::user(text)),
                    Some("assistant") | None => Some(Self::Assistant {
                        text,
                        reasoning: str_field(item, &["reasoning", "reasoning_content"])
                            .map(str::to_string),
                        reasoning_details: item
                            .get("reasoning_details")
                            .and_then(Value::as_array)
                            .cloned(),
                        tool_calls: Vec::new(),
                    }),
                    Some(_) => None,
                }
            }
            _ => None,
        }
    }
}
