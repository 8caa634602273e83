//! Events emitted by the turn engine.

use serde::{Deserialize, Serialize};

use super::command::CommandMessage;
use super::usage::NormalizedUsage;

/// Tool call awaiting a human decision, as presented to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingApproval {
    pub tool_name: String,
    pub call_id: String,
    pub arguments: serde_json::Value,
    /// Human-readable command preview (e.g. the shell command line).
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// One event of a conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    TextDelta {
        delta: String,
        full_text: String,
    },
    ReasoningDelta {
        delta: String,
        full_text: String,
    },
    ToolStarted {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    CommandMessage {
        message: CommandMessage,
    },
    ApprovalRequired {
        approval: PendingApproval,
    },
    Retry {
        tool_name: String,
        attempt: u32,
        max_retries: u32,
        error_message: String,
    },
    Final {
        final_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_messages: Option<Vec<CommandMessage>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<NormalizedUsage>,
    },
    Error {
        message: String,
    },
}
