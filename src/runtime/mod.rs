//! The execution runtime seam.
//!
//! A runtime owns the model's agent loop: it dispatches tools, decides when
//! a tool needs approval, and exposes continuation handles. The turn engine
//! only drives it through [`ExecutionRuntime`].

pub mod chat;

pub use chat::ChatCompletionsRuntime;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A tool call paused for human approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    pub tool_name: String,
    /// Empty when the runtime does not expose call ids.
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Opaque continuation handle for a paused run.
pub trait RunState: fmt::Debug + Send + Sync {
    /// Let the interrupted tool call execute.
    fn approve(&self, interruption: &Interruption);
    /// The runtime's native rejection primitive.
    fn reject(&self, interruption: &Interruption);
}

/// A tool call about to be dispatched, as seen by interceptors.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub call_id: String,
    pub arguments: Value,
}

/// Returns `Some(output)` to short-circuit a tool call with a synthetic
/// result, or `None` to let it run.
pub type ToolInterceptor = Arc<dyn Fn(&ToolInvocation) -> Option<String> + Send + Sync>;

/// Removes an installed interceptor when dropped.
pub struct InterceptorGuard {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl InterceptorGuard {
    pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }
}

impl Drop for InterceptorGuard {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for InterceptorGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorGuard")
            .field("armed", &self.remove.is_some())
            .finish()
    }
}

/// What a new stream is started from.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeInput {
    /// The new user text alone; the runtime threads it onto the previous
    /// response server-side.
    Text(String),
    /// The full wire message array.
    Messages(Vec<Value>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    pub model_id: String,
    pub previous_response_id: Option<String>,
    pub system_prompt: Option<String>,
}

/// Everything the runtime reports once a stream has been fully consumed.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub response_id: Option<String>,
    pub final_output: Option<String>,
    pub interruptions: Vec<Interruption>,
    pub state: Option<Arc<dyn RunState>>,
    pub new_items: Vec<Value>,
    pub usage: Option<Value>,
    pub stream_usage: Option<Value>,
    pub raw_responses: Vec<Value>,
}

/// Raw events plus a future that resolves once they are drained.
pub struct RuntimeStream {
    pub events: BoxStream<'static, Result<Value>>,
    pub completed: BoxFuture<'static, Result<RunOutcome>>,
}

impl fmt::Debug for RuntimeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeStream").finish_non_exhaustive()
    }
}

/// A model-execution runtime.
#[async_trait]
pub trait ExecutionRuntime: Send + Sync {
    async fn start_stream(&self, input: RuntimeInput, options: StreamOptions) -> Result<RuntimeStream>;

    /// Resume a run after its interruption was approved or rejected.
    async fn continue_stream(&self, state: Arc<dyn RunState>) -> Result<RuntimeStream>;

    /// Install an interceptor. `None` means the runtime cannot intercept
    /// tool calls.
    fn add_tool_interceptor(&self, _interceptor: ToolInterceptor) -> Option<InterceptorGuard> {
        None
    }

    /// Cancel whatever the runtime is doing.
    fn abort(&self) {}

    /// Whether the runtime threads conversations server-side by response id.
    fn supports_conversation_chaining(&self) -> bool;

    /// Forget a server-side thread.
    async fn drop_thread(&self, _response_id: &str) -> Result<()> {
        Ok(())
    }
}
