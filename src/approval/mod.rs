//! Tool-approval interruption and resumption.
//!
//! A session holds at most one [`ApprovalContext`], either pending a human
//! decision or aborted by the user. An aborted context is an outstanding
//! obligation: the runtime is still waiting for the tool result, so the next
//! turn must discharge it through [`fake_execute`] before delivering new
//! input.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::commands::{ArgumentCache, REJECTION_MARKER};
use crate::error::{ParleyError, Result};
use crate::runtime::{ExecutionRuntime, InterceptorGuard, Interruption, RunState, ToolInterceptor, ToolInvocation};
use crate::tools::{format_command, ToolArguments};
use crate::types::{NormalizedUsage, PendingApproval};

/// A human answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// Everything needed to resume a run paused on a tool approval.
#[derive(Debug)]
pub struct ApprovalContext {
    pub state: Arc<dyn RunState>,
    pub interruption: Interruption,
    /// Command ids already emitted by the turn that was interrupted.
    pub emitted_command_ids: HashSet<String>,
    /// Argument cache snapshot taken at interruption time.
    pub tool_call_arguments_by_id: ArgumentCache,
    /// User text of the interrupted turn, resent if the continuation has
    /// to be retried.
    pub user_text: String,
    /// Unknown-tool retries the turn has already spent.
    pub retries: u32,
    /// Usage reported before the interruption.
    pub usage: Option<NormalizedUsage>,
}

impl ApprovalContext {
    pub fn new(
        state: Arc<dyn RunState>,
        interruption: Interruption,
        emitted_command_ids: HashSet<String>,
        tool_call_arguments_by_id: ArgumentCache,
    ) -> Self {
        Self {
            state,
            interruption,
            emitted_command_ids,
            tool_call_arguments_by_id,
            user_text: String::new(),
            retries: 0,
            usage: None,
        }
    }

    /// Attach the interrupted turn's progress so the continuation picks it up.
    pub fn carrying(
        mut self,
        user_text: impl Into<String>,
        retries: u32,
        usage: Option<NormalizedUsage>,
    ) -> Self {
        self.user_text = user_text.into();
        self.retries = retries;
        self.usage = usage;
        self
    }

    /// The request as presented to the UI.
    pub fn pending_approval(&self) -> PendingApproval {
        let interruption = &self.interruption;
        let arguments = if interruption.arguments.is_null() {
            self.tool_call_arguments_by_id
                .get(&interruption.call_id)
                .cloned()
                .unwrap_or_default()
        } else {
            interruption.arguments.clone()
        };
        let args = ToolArguments::from_value(Some(&arguments));
        PendingApproval {
            tool_name: interruption.tool_name.clone(),
            call_id: interruption.call_id.clone(),
            command: format_command(&interruption.tool_name, &args, "").command,
            arguments,
            agent: interruption.agent.clone(),
        }
    }
}

/// The session's single approval slot.
#[derive(Debug, Default)]
pub enum ApprovalSlot {
    #[default]
    Idle,
    Pending(Box<ApprovalContext>),
    Aborted(Box<ApprovalContext>),
}

impl ApprovalSlot {
    /// Hold a new pending context. Fails if the slot is occupied.
    pub fn set_pending(&mut self, ctx: ApprovalContext) -> Result<()> {
        match self {
            Self::Idle => {
                *self = Self::Pending(Box::new(ctx));
                Ok(())
            }
            Self::Pending(existing) => Err(ParleyError::InvalidState(format!(
                "approval for {} is already pending",
                existing.interruption.tool_name
            ))),
            Self::Aborted(existing) => Err(ParleyError::InvalidState(format!(
                "aborted approval for {} has not been resolved",
                existing.interruption.tool_name
            ))),
        }
    }

    /// Hold an aborted context again, e.g. after its discharge was itself
    /// aborted. Fails if the slot is occupied.
    pub fn set_aborted(&mut self, ctx: ApprovalContext) -> Result<()> {
        if !self.is_idle() {
            return Err(ParleyError::InvalidState(format!(
                "cannot park aborted approval for {}: slot is occupied",
                ctx.interruption.tool_name
            )));
        }
        *self = Self::Aborted(Box::new(ctx));
        Ok(())
    }

    pub fn pending(&self) -> Option<&ApprovalContext> {
        match self {
            Self::Pending(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn aborted(&self) -> Option<&ApprovalContext> {
        match self {
            Self::Aborted(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Take the pending context, leaving the slot idle.
    pub fn take_pending(&mut self) -> Option<ApprovalContext> {
        match std::mem::take(self) {
            Self::Pending(ctx) => Some(*ctx),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Take the aborted context, leaving the slot idle.
    pub fn take_aborted(&mut self) -> Option<ApprovalContext> {
        match std::mem::take(self) {
            Self::Aborted(ctx) => Some(*ctx),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Move a pending context to aborted. Returns whether anything moved.
    pub fn abort(&mut self) -> bool {
        match std::mem::take(self) {
            Self::Pending(ctx) => {
                *self = Self::Aborted(ctx);
                true
            }
            other => {
                *self = other;
                false
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::Idle;
    }
}

/// Synthetic tool output for a rejected call.
pub fn rejection_message(reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("{REJECTION_MARKER}. Reason: {reason}"),
        None => format!("{REJECTION_MARKER}."),
    }
}

/// Rationale used when a stalled call is resolved by a new user message.
pub fn interrupted_rationale(new_user_text: &str) -> String {
    format!("The user interrupted and sent a new message instead: {new_user_text}")
}

/// One-shot interceptor answering the interrupted call with `message`.
pub fn rejection_interceptor(interruption: &Interruption, message: String) -> ToolInterceptor {
    let tool_name = interruption.tool_name.clone();
    let call_id = interruption.call_id.clone();
    let fired = AtomicBool::new(false);
    Arc::new(move |invocation: &ToolInvocation| {
        let matches = invocation.tool_name == tool_name
            && (call_id.is_empty() || invocation.call_id.is_empty() || invocation.call_id == call_id);
        if !matches || fired.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(message.clone())
    })
}

/// Apply a human decision to the interrupted run.
///
/// Rejection approves administratively with an interceptor supplying the
/// rejection text, falling back to the runtime's native reject when it
/// cannot intercept. Keep the returned guard alive until the turn ends.
pub fn resolve(
    ctx: &ApprovalContext,
    runtime: &dyn ExecutionRuntime,
    decision: ApprovalDecision,
    reason: Option<&str>,
) -> Option<InterceptorGuard> {
    match decision {
        ApprovalDecision::Approve => {
            ctx.state.approve(&ctx.interruption);
            None
        }
        ApprovalDecision::Reject => reject_with(ctx, runtime, rejection_message(reason)),
    }
}

/// Resolve an aborted context as a rejection carrying the new user text.
pub fn fake_execute(
    ctx: &ApprovalContext,
    runtime: &dyn ExecutionRuntime,
    new_user_text: &str,
) -> Option<InterceptorGuard> {
    let message = rejection_message(Some(&interrupted_rationale(new_user_text)));
    reject_with(ctx, runtime, message)
}

fn reject_with(
    ctx: &ApprovalContext,
    runtime: &dyn ExecutionRuntime,
    message: String,
) -> Option<InterceptorGuard> {
    let interceptor = rejection_interceptor(&ctx.interruption, message);
    match runtime.add_tool_interceptor(interceptor) {
        Some(guard) => {
            ctx.state.approve(&ctx.interruption);
            Some(guard)
        }
        None => {
            debug!(
                tool_name = ctx.interruption.tool_name.as_str(),
                "runtime cannot intercept tools; using native reject"
            );
            ctx.state.reject(&ctx.interruption);
            None
        }
    }
}
