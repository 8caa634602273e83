//! Tolerant access to tool call arguments.

use serde_json::Value;

use crate::util::json::parse_arguments;

/// Arguments of one tool call, after a best-effort parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    /// Structured arguments (parsed JSON or already structured).
    Parsed(Value),
    /// Arguments that were present but not valid JSON, kept opaque.
    Raw(String),
    /// No arguments were available from the item or the cache.
    Missing,
}

impl ToolArguments {
    /// Parse raw arguments as they arrived on a tool item.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Missing,
            Some(value) => match parse_arguments(value) {
                Ok(parsed) => Self::Parsed(parsed),
                Err(raw) => Self::Raw(raw),
            },
        }
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        match self {
            Self::Parsed(value) => value.get(key).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Get an argument by the first matching key.
    pub fn get_any(&self, keys: &[&str]) -> Option<&Value> {
        match self {
            Self::Parsed(value) => keys.iter().find_map(|key| value.get(*key)),
            _ => None,
        }
    }

    /// The arguments as a JSON value for display and events.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Parsed(value) => value.clone(),
            Self::Raw(raw) => Value::String(raw.clone()),
            Self::Missing => Value::String("unknown".to_string()),
        }
    }

    /// Compact text rendering used by the generic formatter.
    pub fn render(&self) -> String {
        match self {
            Self::Parsed(value) => value.to_string(),
            Self::Raw(raw) => raw.clone(),
            Self::Missing => "unknown".to_string(),
        }
    }
}
