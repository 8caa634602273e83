//! Conversation sessions and the turn engine.
//!
//! A [`ConversationSession`] drives one turn at a time against an
//! [`ExecutionRuntime`], turning raw runtime events into
//! [`ConversationEvent`]s. Turns are streams borrowed from the session, so
//! a session can never run two turns at once; independent sessions share
//! nothing.

mod conversation;
mod turn;

pub use conversation::{Conversation, HistoryEntry};

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bon::Builder;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::approval::{ApprovalDecision, ApprovalSlot};
use crate::commands::{CommandExtractor, Diagnostic};
use crate::error::Result;
use crate::runtime::ExecutionRuntime;
use crate::types::{CommandMessage, ConversationEvent, NormalizedUsage, PendingApproval};

pub const DEFAULT_MAX_TOOL_RETRIES: u32 = 2;

/// Text returned by the buffering methods when a turn produced none.
pub const NO_RESPONSE_TEXT: &str = "(no response)";

/// Per-session settings.
#[derive(Debug, Clone, Builder, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[builder(into)]
    pub model_id: String,
    #[builder(into)]
    pub system_prompt: Option<String>,
    /// Retries after the model requests a tool that does not exist.
    #[builder(default = DEFAULT_MAX_TOOL_RETRIES)]
    pub max_tool_retries: u32,
    /// Log every raw runtime event at debug level.
    #[builder(default)]
    pub debug_events: bool,
}

/// Buffered result of one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub text: String,
    pub reasoning: Option<String>,
    pub command_messages: Vec<CommandMessage>,
    pub usage: Option<NormalizedUsage>,
    /// Set when the turn stopped for a tool approval.
    pub approval: Option<PendingApproval>,
}

impl TurnResponse {
    fn absorb(&mut self, event: ConversationEvent) {
        match event {
            ConversationEvent::TextDelta { full_text, .. } => self.text = full_text,
            ConversationEvent::ReasoningDelta { full_text, .. } => self.reasoning = Some(full_text),
            ConversationEvent::CommandMessage { message } => self.add_command(message),
            ConversationEvent::ApprovalRequired { approval } => self.approval = Some(approval),
            ConversationEvent::Retry { .. } => {
                self.text.clear();
                self.reasoning = None;
            }
            ConversationEvent::Final {
                final_text,
                reasoning_text,
                command_messages,
                usage,
            } => {
                if !final_text.trim().is_empty() {
                    self.text = final_text;
                }
                if reasoning_text.is_some() {
                    self.reasoning = reasoning_text;
                }
                for message in command_messages.into_iter().flatten() {
                    self.add_command(message);
                }
                self.usage = usage;
            }
            ConversationEvent::ToolStarted { .. } | ConversationEvent::Error { .. } => {}
        }
    }

    fn add_command(&mut self, message: CommandMessage) {
        if message.is_visible() && !self.command_messages.iter().any(|m| m.id == message.id) {
            self.command_messages.push(message);
        }
    }
}

/// Receives every event of a buffered turn as it happens.
pub type EventObserver<'a> = &'a mut (dyn FnMut(&ConversationEvent) + Send);

/// Cancels the turn in flight from another task.
///
/// Each turn arms a fresh token, so aborting between turns has no effect on
/// the next one.
#[derive(Clone)]
pub struct AbortHandle {
    token: Arc<Mutex<CancellationToken>>,
    runtime: Arc<dyn ExecutionRuntime>,
}

impl AbortHandle {
    fn new(runtime: Arc<dyn ExecutionRuntime>) -> Self {
        Self {
            token: Arc::new(Mutex::new(CancellationToken::new())),
            runtime,
        }
    }

    pub fn abort(&self) {
        self.current().cancel();
        self.runtime.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.current().is_cancelled()
    }

    fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn refresh(&self) -> CancellationToken {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = CancellationToken::new();
        token.clone()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Identifies a session in logs.
pub type SessionId = Uuid;

/// One conversation against one execution runtime.
pub struct ConversationSession {
    id: SessionId,
    runtime: Arc<dyn ExecutionRuntime>,
    config: SessionConfig,
    history: Conversation,
    previous_response_id: Option<String>,
    approval: ApprovalSlot,
    extractor: CommandExtractor,
    diagnostics: Vec<Diagnostic>,
    abort: AbortHandle,
    turn_count: u64,
}

impl fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("history", &self.history.len())
            .field("previous_response_id", &self.previous_response_id)
            .field("approval", &self.approval)
            .field("turn_count", &self.turn_count)
            .finish_non_exhaustive()
    }
}

impl ConversationSession {
    pub fn new(runtime: Arc<dyn ExecutionRuntime>, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            abort: AbortHandle::new(Arc::clone(&runtime)),
            runtime,
            config,
            history: Conversation::new(),
            previous_response_id: None,
            approval: ApprovalSlot::default(),
            extractor: CommandExtractor::new(),
            diagnostics: Vec::new(),
            turn_count: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    /// Switch the model used by subsequent turns.
    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.config.model_id = model_id.into();
        debug!(model = self.config.model_id.as_str(), "model switched");
    }

    pub fn history(&self) -> &Conversation {
        &self.history
    }

    pub fn previous_response_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    pub fn approval_state(&self) -> &ApprovalSlot {
        &self.approval
    }

    pub fn pending_approval(&self) -> Option<PendingApproval> {
        self.approval.pending().map(|ctx| ctx.pending_approval())
    }

    /// Diagnostics recorded during the most recent turn.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run one turn for new user text.
    ///
    /// The stream ends after `approval_required` or `final`, or with an
    /// `Err` item (preceded by an `error` event unless the user aborted).
    pub fn run(&mut self, text: impl Into<String>) -> BoxStream<'_, Result<ConversationEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        turn::event_stream(self.drive_run(text.into(), tx), rx)
    }

    /// Resolve the pending approval and continue the interrupted turn.
    pub fn continue_turn(
        &mut self,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) -> BoxStream<'_, Result<ConversationEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        turn::event_stream(self.drive_continue(decision, reason, tx), rx)
    }

    /// [`run`](Self::run), buffered.
    pub async fn send_message(
        &mut self,
        text: impl Into<String>,
        observer: Option<EventObserver<'_>>,
    ) -> Result<TurnResponse> {
        let events = self.run(text);
        collect(events, observer).await
    }

    /// [`continue_turn`](Self::continue_turn), buffered.
    pub async fn handle_approval_decision(
        &mut self,
        decision: ApprovalDecision,
        reason: Option<String>,
        observer: Option<EventObserver<'_>>,
    ) -> Result<TurnResponse> {
        let events = self.continue_turn(decision, reason);
        collect(events, observer).await
    }

    /// Cancel the turn in flight and park any pending approval as aborted.
    /// Returns whether an approval was parked.
    pub fn abort(&mut self) -> bool {
        self.abort.abort();
        let parked = self.approval.abort();
        if parked {
            debug!("pending approval moved to aborted");
        }
        parked
    }

    /// Forget everything: history, thread handle, approval, argument cache.
    pub async fn reset(&mut self) {
        let response_id = self.previous_response_id.take();
        self.history.clear();
        self.approval.clear();
        self.extractor.reset();
        self.diagnostics.clear();
        if let Some(response_id) = response_id {
            if let Err(err) = self.runtime.drop_thread(&response_id).await {
                warn!(error = %err, "failed to drop server-side thread");
            }
        }
    }
}

async fn collect(
    mut events: BoxStream<'_, Result<ConversationEvent>>,
    mut observer: Option<EventObserver<'_>>,
) -> Result<TurnResponse> {
    let mut response = TurnResponse::default();
    while let Some(event) = events.next().await {
        let event = event?;
        if let Some(observe) = observer.as_mut() {
            observe(&event);
        }
        response.absorb(event);
    }
    if response.text.trim().is_empty() {
        response.text = NO_RESPONSE_TEXT.to_string();
    }
    Ok(response)
}
