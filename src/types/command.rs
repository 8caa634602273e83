//! Tool invocation records shown to the user.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a command message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A formatted, deduplicatable record of one tool invocation.
///
/// `id` is stable between the live stream and the terminal snapshot of the
/// same invocation and is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    pub id: String,
    pub status: CommandStatus,
    pub command: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Synthetic result produced by a rejected approval, not real tool output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_approval_rejection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
}

impl CommandMessage {
    /// Whether this message represents genuine tool output.
    pub fn is_visible(&self) -> bool {
        !self.is_approval_rejection
    }
}
