//! The turn engine: one request/response cycle against the runtime.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ConversationSession;
use crate::approval::{self, ApprovalContext, ApprovalDecision};
use crate::error::{ParleyError, Result};
use crate::provider::build_wire_messages;
use crate::runtime::{RunOutcome, RuntimeInput, RuntimeStream, StreamOptions};
use crate::stream::{
    extract_reasoning_delta, extract_text_delta, extract_tool_item, extract_usage, UsageSources,
};
use crate::tools::ToolArguments;
use crate::types::{ConversationEvent, HistoryItem, NormalizedUsage};

type EventTx = mpsc::UnboundedSender<ConversationEvent>;

/// Stalled approvals resolved in a row before giving up on an aborted run.
const MAX_FAKE_EXECUTIONS: usize = 4;

/// Mutable state of one logical turn, including an approval continuation.
#[derive(Debug, Default)]
struct TurnState {
    user_text: String,
    /// Command ids already emitted; only ever grows.
    emitted: HashSet<String>,
    /// Call ids that produced a `tool_started` event.
    started: HashSet<String>,
    text: String,
    reasoning: String,
    /// Usage reported by the current stream.
    usage: Option<NormalizedUsage>,
    /// Usage of earlier streams of the same logical turn.
    carried_usage: Option<NormalizedUsage>,
    /// Unknown-tool retries spent, shared with any continuation.
    retries: u32,
    /// Tool items seen live, flushed to history if the attempt fails.
    pending_items: Vec<Value>,
    user_recorded: bool,
    stream_started: bool,
    text_deltas: usize,
    reasoning_deltas: usize,
}

impl TurnState {
    fn new(user_text: String) -> Self {
        Self {
            user_text,
            ..Default::default()
        }
    }

    fn resuming(ctx: &ApprovalContext) -> Self {
        Self {
            user_text: ctx.user_text.clone(),
            emitted: ctx.emitted_command_ids.clone(),
            carried_usage: ctx.usage.clone(),
            retries: ctx.retries,
            user_recorded: true,
            ..Default::default()
        }
    }

    /// Forget the failed attempt's output, keeping dedup state and the
    /// tokens it spent.
    fn restart(&mut self) {
        self.text.clear();
        self.reasoning.clear();
        add_usage(&mut self.carried_usage, self.usage.take());
        self.pending_items.clear();
        self.stream_started = false;
    }
}

fn add_usage(total: &mut Option<NormalizedUsage>, usage: Option<NormalizedUsage>) {
    let Some(usage) = usage else {
        return;
    };
    match total.as_mut() {
        Some(total) => total.merge(&usage),
        None => *total = Some(usage),
    }
}

enum Step {
    Event(ConversationEvent),
    Finished(Result<()>),
}

/// Drive `turn` while forwarding what it emits on `rx`.
pub(super) fn event_stream<'a>(
    turn: impl Future<Output = Result<()>> + Send + 'a,
    mut rx: mpsc::UnboundedReceiver<ConversationEvent>,
) -> BoxStream<'a, Result<ConversationEvent>> {
    Box::pin(async_stream::stream! {
        futures::pin_mut!(turn);
        let mut outcome = None;
        loop {
            let step = if outcome.is_none() {
                tokio::select! {
                    biased;
                    Some(event) = rx.recv() => Step::Event(event),
                    result = &mut turn => Step::Finished(result),
                }
            } else {
                match rx.recv().await {
                    Some(event) => Step::Event(event),
                    None => break,
                }
            };
            match step {
                Step::Event(event) => yield Ok(event),
                Step::Finished(result) => outcome = Some(result),
            }
        }
        if let Some(Err(err)) = outcome {
            yield Err(err);
        }
    })
}

fn emit(tx: &EventTx, event: ConversationEvent) {
    let _ = tx.send(event); // receiver gone means the caller dropped the turn
}

async fn cancellable<T>(
    token: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ParleyError::Aborted),
        result = future => result,
    }
}

impl ConversationSession {
    pub(super) async fn drive_run(&mut self, text: String, tx: EventTx) -> Result<()> {
        let token = self.abort.refresh();
        self.turn_count += 1;
        let turn_id = self.turn_count;
        debug!(
            session = %self.id,
            turn = turn_id,
            model = self.config.model_id.as_str(),
            chaining = self.runtime.supports_conversation_chaining(),
            "starting turn"
        );

        if let Some(ctx) = self.approval.take_aborted() {
            match self.discharge_aborted(ctx, &text, &token).await {
                Ok(()) => {}
                Err(err) if err.is_abort() => return Err(err),
                Err(err) => {
                    warn!(turn = turn_id, error = %err, "resolving the aborted approval failed; continuing")
                }
            }
        }

        let mut turn = TurnState::new(text);
        let result = self.drive_attempts(None, &mut turn, &tx, &token, turn_id).await;
        self.finish_turn(turn_id, &turn);
        result
    }

    pub(super) async fn drive_continue(
        &mut self,
        decision: ApprovalDecision,
        reason: Option<String>,
        tx: EventTx,
    ) -> Result<()> {
        let token = self.abort.refresh();
        let turn_id = self.turn_count;
        let Some(ctx) = self.approval.take_pending() else {
            let err = ParleyError::InvalidState("no approval is pending".into());
            emit(&tx, ConversationEvent::Error { message: err.to_string() });
            return Err(err);
        };
        debug!(
            turn = turn_id,
            tool_name = ctx.interruption.tool_name.as_str(),
            call_id = ctx.interruption.call_id.as_str(),
            %decision,
            "resolving approval"
        );

        self.extractor.restore_arguments(ctx.tool_call_arguments_by_id.clone());
        let runtime = Arc::clone(&self.runtime);
        let _interceptor = approval::resolve(&ctx, runtime.as_ref(), decision, reason.as_deref());

        let mut turn = TurnState::resuming(&ctx);
        let result = self.drive_attempts(Some(&ctx), &mut turn, &tx, &token, turn_id).await;
        self.finish_turn(turn_id, &turn);
        result
    }

    /// Drive one logical turn to its terminal event. Unknown-tool failures
    /// are retried with a fresh stream while the turn's retry budget lasts;
    /// the continuation of an approval spends the same budget.
    async fn drive_attempts(
        &mut self,
        mut resume_from: Option<&ApprovalContext>,
        turn: &mut TurnState,
        tx: &EventTx,
        token: &CancellationToken,
        turn_id: u64,
    ) -> Result<()> {
        let max_retries = self.config.max_tool_retries;
        loop {
            let result = match resume_from.take() {
                Some(ctx) => self.resume(ctx, turn, tx, token).await,
                None => self.attempt(turn, tx, token).await,
            };
            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if err.is_abort() {
                self.flush_partial(turn);
                return Err(err);
            }
            let category = err.category();
            if !category.is_retried_by_engine() || turn.retries >= max_retries {
                debug!(turn = turn_id, ?category, error = %err, "turn failed");
                emit(tx, ConversationEvent::Error { message: err.to_string() });
                return Err(err);
            }

            turn.retries += 1;
            if turn.stream_started {
                self.flush_partial(turn);
            }
            let tool_name = err.hallucinated_tool().unwrap_or_default();
            warn!(
                turn = turn_id,
                tool_name = tool_name.as_str(),
                attempt = turn.retries,
                "model requested an unknown tool; retrying"
            );
            emit(
                tx,
                ConversationEvent::Retry {
                    tool_name,
                    attempt: turn.retries,
                    max_retries,
                    error_message: err.to_string(),
                },
            );
            turn.restart();
        }
    }

    /// Unblock a run left waiting on an aborted approval by answering the
    /// stalled call with a rejection that carries the new user text.
    async fn discharge_aborted(
        &mut self,
        mut ctx: ApprovalContext,
        text: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let (silent, _) = mpsc::unbounded_channel();
        let runtime = Arc::clone(&self.runtime);
        for round in 1..=MAX_FAKE_EXECUTIONS {
            debug!(
                tool_name = ctx.interruption.tool_name.as_str(),
                call_id = ctx.interruption.call_id.as_str(),
                round,
                "resolving aborted approval"
            );
            self.extractor.restore_arguments(ctx.tool_call_arguments_by_id.clone());
            let _interceptor = approval::fake_execute(&ctx, runtime.as_ref(), text);
            let mut turn = TurnState::resuming(&ctx);
            if let Err(err) = self.resume(&ctx, &mut turn, &silent, token).await {
                if err.is_abort() {
                    // The run still waits on this call; the next message
                    // discharges it again.
                    if let Err(slot_err) = self.approval.set_aborted(ctx) {
                        warn!(error = %slot_err, "dropping aborted approval");
                    }
                }
                return Err(err);
            }
            match self.approval.take_pending() {
                Some(next) => ctx = next,
                None => return Ok(()),
            }
        }
        Err(ParleyError::Runtime(
            "aborted run kept requesting tool approvals".into(),
        ))
    }

    async fn resume(
        &mut self,
        ctx: &ApprovalContext,
        turn: &mut TurnState,
        tx: &EventTx,
        token: &CancellationToken,
    ) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        let stream = cancellable(token, runtime.continue_stream(Arc::clone(&ctx.state))).await?;
        turn.stream_started = true;
        let outcome = self.pump(stream, turn, tx, token).await?;
        self.complete(outcome, turn, tx)
    }

    async fn attempt(
        &mut self,
        turn: &mut TurnState,
        tx: &EventTx,
        token: &CancellationToken,
    ) -> Result<()> {
        let recorded_at = if turn.user_recorded {
            None
        } else {
            let mark = self.history.len();
            self.history.push(HistoryItem::user(turn.user_text.as_str()));
            turn.user_recorded = true;
            Some(mark)
        };
        let input = self.runtime_input(&turn.user_text);
        let options = self.stream_options();
        let runtime = Arc::clone(&self.runtime);
        let stream = match cancellable(token, runtime.start_stream(input, options)).await {
            Ok(stream) => stream,
            Err(err) => {
                if let Some(mark) = recorded_at.filter(|_| !err.is_abort()) {
                    // Nothing reached the model; take back only the user
                    // message this attempt recorded.
                    self.history.truncate(mark);
                    turn.user_recorded = false;
                }
                return Err(err);
            }
        };
        turn.stream_started = true;
        let outcome = self.pump(stream, turn, tx, token).await?;
        self.complete(outcome, turn, tx)
    }

    fn runtime_input(&self, text: &str) -> RuntimeInput {
        if self.runtime.supports_conversation_chaining() {
            RuntimeInput::Text(text.to_string())
        } else {
            RuntimeInput::Messages(build_wire_messages(
                self.history.items(),
                self.config.system_prompt.as_deref(),
                &self.config.model_id,
            ))
        }
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            model_id: self.config.model_id.clone(),
            previous_response_id: if self.runtime.supports_conversation_chaining() {
                self.previous_response_id.clone()
            } else {
                None
            },
            system_prompt: self.config.system_prompt.clone(),
        }
    }

    async fn pump(
        &mut self,
        stream: RuntimeStream,
        turn: &mut TurnState,
        tx: &EventTx,
        token: &CancellationToken,
    ) -> Result<RunOutcome> {
        let RuntimeStream {
            mut events,
            completed,
        } = stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ParleyError::Aborted),
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => self.handle_event(&event, turn, tx),
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        cancellable(token, completed).await
    }

    fn handle_event(&mut self, event: &Value, turn: &mut TurnState, tx: &EventTx) {
        if self.config.debug_events {
            debug!(event = %event, "raw runtime event");
        }

        if let Some(delta) = extract_text_delta(event) {
            turn.text.push_str(&delta);
            turn.text_deltas += 1;
            emit(
                tx,
                ConversationEvent::TextDelta {
                    delta,
                    full_text: turn.text.clone(),
                },
            );
        }
        if let Some(delta) = extract_reasoning_delta(event) {
            turn.reasoning.push_str(&delta);
            turn.reasoning_deltas += 1;
            emit(
                tx,
                ConversationEvent::ReasoningDelta {
                    delta,
                    full_text: turn.reasoning.clone(),
                },
            );
        }

        if let Some(item) = extract_tool_item(event) {
            turn.pending_items.push(item.clone());
            if let Some((call_id, tool_name)) = self.extractor.observe_invocation(item) {
                if turn.started.insert(call_id.clone()) {
                    let arguments =
                        ToolArguments::from_value(self.extractor.cached_arguments(&call_id)).to_value();
                    emit(
                        tx,
                        ConversationEvent::ToolStarted {
                            tool_call_id: call_id,
                            tool_name,
                            arguments,
                        },
                    );
                }
            } else {
                for message in self.extractor.extract(std::iter::once(item), &turn.emitted) {
                    turn.emitted.insert(message.id.clone());
                    emit(tx, ConversationEvent::CommandMessage { message });
                }
            }
        }

        let sources = UsageSources {
            event: Some(event),
            ..Default::default()
        };
        if let Some(usage) = extract_usage(&sources).filter(|usage| !usage.is_empty()) {
            add_usage(&mut turn.usage, Some(usage));
        }
    }

    /// Record the finished stream and emit the turn's terminal event.
    fn complete(&mut self, outcome: RunOutcome, turn: &mut TurnState, tx: &EventTx) -> Result<()> {
        let RunOutcome {
            response_id,
            final_output,
            interruptions,
            state,
            new_items,
            usage: outcome_usage,
            stream_usage,
            raw_responses,
        } = outcome;

        if let Some(response_id) = response_id {
            self.previous_response_id = Some(response_id);
        }

        let snapshot = self.extractor.extract(&new_items, &turn.emitted);
        turn.emitted.extend(snapshot.iter().map(|m| m.id.clone()));

        let items = if new_items.is_empty() {
            std::mem::take(&mut turn.pending_items)
        } else {
            turn.pending_items.clear();
            new_items
        };
        self.history.extend_from_raw(&items);

        let segment_usage = turn.usage.take().or_else(|| {
            extract_usage(&UsageSources {
                event: None,
                completed: outcome_usage.as_ref(),
                stream: stream_usage.as_ref(),
                raw_responses: &raw_responses,
            })
        });
        let mut usage = turn.carried_usage.take();
        add_usage(&mut usage, segment_usage);

        if let Some(interruption) = interruptions.first().cloned() {
            if interruptions.len() > 1 {
                warn!(
                    count = interruptions.len(),
                    "runtime reported several interruptions; surfacing the first"
                );
            }
            let state = state.ok_or_else(|| {
                ParleyError::Runtime("interruption reported without a continuation state".into())
            })?;
            for message in snapshot {
                emit(tx, ConversationEvent::CommandMessage { message });
            }
            let ctx = ApprovalContext::new(
                state,
                interruption,
                turn.emitted.clone(),
                self.extractor.snapshot_arguments(),
            )
            .carrying(turn.user_text.as_str(), turn.retries, usage);
            let approval = ctx.pending_approval();
            self.approval.set_pending(ctx)?;
            debug!(
                tool_name = approval.tool_name.as_str(),
                call_id = approval.call_id.as_str(),
                "approval required"
            );
            emit(tx, ConversationEvent::ApprovalRequired { approval });
            return Ok(());
        }

        let final_text = final_output
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| turn.text.clone());
        if !final_text.is_empty() && !matches!(self.history.last(), Some(HistoryItem::Assistant { .. })) {
            self.history.push(HistoryItem::assistant(final_text.clone()));
        }

        let command_messages: Vec<_> = snapshot.into_iter().filter(|m| m.is_visible()).collect();

        emit(
            tx,
            ConversationEvent::Final {
                final_text,
                reasoning_text: (!turn.reasoning.is_empty()).then(|| turn.reasoning.clone()),
                command_messages: (!command_messages.is_empty()).then_some(command_messages),
                usage,
            },
        );
        Ok(())
    }

    /// Keep tool work that completed before a failed attempt. Calls without
    /// a result are dropped so the history stays answerable.
    fn flush_partial(&mut self, turn: &mut TurnState) {
        let items: Vec<HistoryItem> = turn
            .pending_items
            .drain(..)
            .filter_map(|raw| HistoryItem::from_raw(&raw))
            .collect();
        let answered: HashSet<String> = items
            .iter()
            .filter_map(|item| match item {
                HistoryItem::ToolResult { call_id, .. } => Some(call_id.clone()),
                _ => None,
            })
            .collect();
        let appended = self.history.extend_dedup(items.into_iter().filter(|item| match item {
            HistoryItem::ToolCall(call) => answered.contains(&call.call_id),
            _ => true,
        }));
        if appended > 0 {
            debug!(appended, "flushed partial progress into history");
        }
    }

    fn finish_turn(&mut self, turn_id: u64, turn: &TurnState) {
        self.diagnostics = self.extractor.take_diagnostics();
        debug!(
            session = %self.id,
            turn = turn_id,
            text_deltas = turn.text_deltas,
            reasoning_deltas = turn.reasoning_deltas,
            commands = turn.emitted.len(),
            diagnostics = self.diagnostics.len(),
            "turn finished"
        );
    }
}
