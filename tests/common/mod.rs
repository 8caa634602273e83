//! Shared test helpers: a scripted execution runtime.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Value};

use parley::error::{ParleyError, Result};
use parley::runtime::{
    ExecutionRuntime, InterceptorGuard, Interruption, RunOutcome, RunState, RuntimeInput,
    RuntimeStream, StreamOptions, ToolInterceptor, ToolInvocation,
};
use parley::types::ConversationEvent;

/// How a scripted step fails.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The model asked for a tool that does not exist.
    UnknownTool(&'static str),
    /// Transport failure.
    Network(&'static str),
}

impl Failure {
    fn into_error(self) -> ParleyError {
        match self {
            Failure::UnknownTool(name) => ParleyError::tool_not_found(name),
            Failure::Network(message) => ParleyError::Stream(message.to_string()),
        }
    }
}

/// What the runtime reports once a scripted stream completes.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub response_id: Option<String>,
    pub final_output: Option<String>,
    pub interruption: Option<Interruption>,
    pub new_items: Vec<Value>,
    pub usage: Option<Value>,
}

/// One scripted answer to `start_stream` / `continue_stream`.
#[derive(Debug, Clone)]
pub enum Step {
    Stream { events: Vec<Value>, completion: Completion },
    FailStart(Failure),
    FailMidStream { events: Vec<Value>, failure: Failure },
    /// Yields the events, then never finishes.
    Hang { events: Vec<Value> },
}

impl Step {
    pub fn text(text: &str) -> Self {
        Step::Stream {
            events: vec![json!({"type": "output_text_delta", "delta": text})],
            completion: Completion {
                final_output: Some(text.to_string()),
                new_items: vec![assistant_item(text)],
                ..Default::default()
            },
        }
    }

    /// Pause on an approval for `tool_name` / `call_id`.
    pub fn interrupt(call_id: &str, tool_name: &str, arguments: Value) -> Self {
        let invocation = function_call(call_id, tool_name, arguments.clone());
        Step::Stream {
            events: vec![invocation.clone()],
            completion: Completion {
                interruption: Some(Interruption {
                    tool_name: tool_name.to_string(),
                    call_id: call_id.to_string(),
                    arguments,
                    agent: Some("assistant".to_string()),
                }),
                new_items: vec![invocation],
                ..Default::default()
            },
        }
    }
}

pub fn function_call(call_id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "type": "function_call",
        "callId": call_id,
        "name": name,
        "arguments": arguments.to_string(),
    })
}

pub fn function_result(call_id: &str, output: &str) -> Value {
    json!({"type": "function_call_result", "callId": call_id, "output": output})
}

pub fn assistant_item(text: &str) -> Value {
    json!({"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": text}]})
}

/// Wrap a raw item the way agent runtimes stream run items.
pub fn run_item_event(item: Value) -> Value {
    json!({"type": "run_item_stream_event", "item": {"type": "tool_call_item", "rawItem": item}})
}

/// Continuation handle recording what was decided.
#[derive(Debug, Default)]
pub struct ScriptedState {
    pub decisions: Mutex<Vec<&'static str>>,
}

impl RunState for ScriptedState {
    fn approve(&self, _interruption: &Interruption) {
        self.decisions.lock().unwrap().push("approve");
    }

    fn reject(&self, _interruption: &Interruption) {
        self.decisions.lock().unwrap().push("reject");
    }
}

type Registry = Arc<Mutex<Vec<(u64, ToolInterceptor)>>>;

/// Runtime answering from a queue of [`Step`]s.
///
/// On continuation the paused call is dispatched through installed
/// interceptors, so a synthetic result shows up as the first event.
pub struct ScriptedRuntime {
    steps: Mutex<VecDeque<Step>>,
    chaining: bool,
    intercepts: bool,
    interceptors: Registry,
    next_interceptor: AtomicU64,
    paused: Mutex<Option<(Arc<ScriptedState>, Interruption)>>,
    pub starts: Mutex<Vec<(RuntimeInput, StreamOptions)>>,
    pub continuations: AtomicUsize,
    pub intercepted: Mutex<Vec<String>>,
    pub dropped_threads: Mutex<Vec<String>>,
    pub aborts: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            chaining: false,
            intercepts: true,
            interceptors: Arc::new(Mutex::new(Vec::new())),
            next_interceptor: AtomicU64::new(0),
            paused: Mutex::new(None),
            starts: Mutex::new(Vec::new()),
            continuations: AtomicUsize::new(0),
            intercepted: Mutex::new(Vec::new()),
            dropped_threads: Mutex::new(Vec::new()),
            aborts: AtomicUsize::new(0),
        }
    }

    pub fn with_chaining(mut self) -> Self {
        self.chaining = true;
        self
    }

    pub fn without_interceptors(mut self) -> Self {
        self.intercepts = false;
        self
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.lock().unwrap().len()
    }

    pub fn start_inputs(&self) -> Vec<RuntimeInput> {
        self.starts.lock().unwrap().iter().map(|(input, _)| input.clone()).collect()
    }

    pub fn paused_state(&self) -> Option<Arc<ScriptedState>> {
        self.paused.lock().unwrap().as_ref().map(|(state, _)| Arc::clone(state))
    }

    fn next_step(&self) -> Result<Step> {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ParleyError::Runtime("script exhausted".into()))
    }

    fn play(&self, step: Step, mut prefix: Vec<Value>) -> Result<RuntimeStream> {
        match step {
            Step::FailStart(failure) => Err(failure.into_error()),
            Step::Stream { events, completion } => {
                let mut new_items = prefix.clone();
                new_items.extend(completion.new_items);
                prefix.extend(events);
                let state = completion.interruption.as_ref().map(|interruption| {
                    let state = Arc::new(ScriptedState::default());
                    *self.paused.lock().unwrap() = Some((Arc::clone(&state), interruption.clone()));
                    state
                });
                let outcome = RunOutcome {
                    response_id: completion.response_id,
                    final_output: completion.final_output,
                    interruptions: completion.interruption.into_iter().collect(),
                    state: state.map(|s| s as Arc<dyn RunState>),
                    new_items,
                    usage: completion.usage,
                    ..Default::default()
                };
                Ok(RuntimeStream {
                    events: futures::stream::iter(prefix.into_iter().map(Ok)).boxed(),
                    completed: async move { Ok(outcome) }.boxed(),
                })
            }
            Step::FailMidStream { events, failure } => {
                prefix.extend(events);
                let error = failure.into_error();
                let events = futures::stream::iter(prefix.into_iter().map(Ok))
                    .chain(futures::stream::once(async move { Err(error) }));
                Ok(RuntimeStream {
                    events: events.boxed(),
                    completed: async { Err(ParleyError::Runtime("stream failed".into())) }.boxed(),
                })
            }
            Step::Hang { events } => {
                prefix.extend(events);
                let events = futures::stream::iter(prefix.into_iter().map(Ok))
                    .chain(futures::stream::pending());
                Ok(RuntimeStream {
                    events: events.boxed(),
                    completed: futures::future::pending().boxed(),
                })
            }
        }
    }

    /// Dispatch the paused call: interceptor output, native rejection, or
    /// nothing (the script supplies the real result).
    fn dispatch_paused(&self) -> Vec<Value> {
        let Some((state, interruption)) = self.paused.lock().unwrap().take() else {
            return Vec::new();
        };
        let decision = state.decisions.lock().unwrap().last().copied();
        match decision {
            Some("approve") => {
                let invocation = ToolInvocation {
                    tool_name: interruption.tool_name.clone(),
                    call_id: interruption.call_id.clone(),
                    arguments: interruption.arguments.clone(),
                };
                let interceptors: Vec<ToolInterceptor> = self
                    .interceptors
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(_, interceptor)| Arc::clone(interceptor))
                    .collect();
                match interceptors.iter().find_map(|interceptor| interceptor(&invocation)) {
                    Some(output) => {
                        self.intercepted.lock().unwrap().push(output.clone());
                        vec![function_result(&interruption.call_id, &output)]
                    }
                    None => Vec::new(),
                }
            }
            Some(_) => vec![function_result(&interruption.call_id, "rejected by runtime")],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ExecutionRuntime for ScriptedRuntime {
    async fn start_stream(&self, input: RuntimeInput, options: StreamOptions) -> Result<RuntimeStream> {
        self.starts.lock().unwrap().push((input, options));
        let step = self.next_step()?;
        self.play(step, Vec::new())
    }

    async fn continue_stream(&self, _state: Arc<dyn RunState>) -> Result<RuntimeStream> {
        self.continuations.fetch_add(1, Ordering::SeqCst);
        let prefix = self.dispatch_paused();
        let step = self.next_step()?;
        self.play(step, prefix)
    }

    fn add_tool_interceptor(&self, interceptor: ToolInterceptor) -> Option<InterceptorGuard> {
        if !self.intercepts {
            return None;
        }
        let id = self.next_interceptor.fetch_add(1, Ordering::SeqCst);
        self.interceptors.lock().unwrap().push((id, interceptor));
        let registry = Arc::clone(&self.interceptors);
        Some(InterceptorGuard::new(move || {
            registry.lock().unwrap().retain(|(existing, _)| *existing != id);
        }))
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn supports_conversation_chaining(&self) -> bool {
        self.chaining
    }

    async fn drop_thread(&self, response_id: &str) -> Result<()> {
        self.dropped_threads.lock().unwrap().push(response_id.to_string());
        Ok(())
    }
}

/// Drain a turn into its events and final result.
pub async fn collect_turn(
    mut events: futures::stream::BoxStream<'_, Result<ConversationEvent>>,
) -> (Vec<ConversationEvent>, Result<()>) {
    let mut collected = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => collected.push(event),
            Err(err) => return (collected, Err(err)),
        }
    }
    (collected, Ok(()))
}

pub fn command_ids(events: &[ConversationEvent]) -> Vec<String> {
    events
        .iter()
        .flat_map(|event| match event {
            ConversationEvent::CommandMessage { message } => vec![message.id.clone()],
            ConversationEvent::Final {
                command_messages: Some(messages),
                ..
            } => messages.iter().map(|m| m.id.clone()).collect(),
            _ => Vec::new(),
        })
        .collect()
}
