//! Convenience re-exports for common use.

pub use crate::approval::ApprovalDecision;
pub use crate::config::ParleyConfig;
pub use crate::error::{ParleyError, Result};
pub use crate::runtime::{
    ChatCompletionsRuntime, ExecutionRuntime, Interruption, RunOutcome, RunState, RuntimeInput,
    RuntimeStream, StreamOptions,
};
pub use crate::session::{AbortHandle, ConversationSession, SessionConfig, SessionId, TurnResponse};
pub use crate::types::{
    CommandMessage, CommandStatus, ConversationEvent, HistoryItem, NormalizedUsage, PendingApproval,
};
