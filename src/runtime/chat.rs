//! A tool-less runtime over a chat-completions endpoint.
//!
//! Useful on its own for plain chat and as the reference implementation of
//! [`ExecutionRuntime`] for providers without server-side threading: every
//! request carries the full adapted history.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{ExecutionRuntime, RunOutcome, RunState, RuntimeInput, RuntimeStream, StreamOptions};
use crate::error::{ParleyError, Result};
use crate::provider::{ChatCompletion, ChatCompletionsClient, SseAccumulator};

#[derive(Debug, Clone)]
pub struct ChatCompletionsRuntime {
    client: ChatCompletionsClient,
}

impl ChatCompletionsRuntime {
    pub fn new(client: ChatCompletionsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutionRuntime for ChatCompletionsRuntime {
    async fn start_stream(&self, input: RuntimeInput, options: StreamOptions) -> Result<RuntimeStream> {
        let messages = match input {
            RuntimeInput::Messages(messages) => messages,
            RuntimeInput::Text(text) => {
                let mut messages = Vec::new();
                if let Some(system) = options.system_prompt.as_deref() {
                    messages.push(json!({"role": "system", "content": system}));
                }
                messages.push(json!({"role": "user", "content": text}));
                messages
            }
        };

        let mut client = self.client.clone();
        if !options.model_id.is_empty() {
            client.set_model(options.model_id);
        }
        let mut chunks = client.stream_chunks(&messages, &[]).await?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let events = async_stream::stream! {
            let mut accumulator = SseAccumulator::new();
            let mut response_id = None;
            let mut raw_responses = Vec::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                if response_id.is_none() {
                    response_id = chunk.get("id").and_then(Value::as_str).map(str::to_string);
                }
                accumulator.push(&chunk);
                if chunk.get("usage").is_some_and(Value::is_object) {
                    raw_responses.push(chunk.clone());
                }
                yield Ok(chunk);
            }
            let outcome = outcome_from(accumulator.finish(), response_id, raw_responses);
            if outcome_tx.send(outcome).is_err() {
                debug!("run outcome receiver dropped");
            }
        };

        let completed = async move {
            outcome_rx
                .await
                .map_err(|_| ParleyError::Stream("chat completion stream ended before completion".into()))
        }
        .boxed();

        Ok(RuntimeStream {
            events: events.boxed(),
            completed,
        })
    }

    async fn continue_stream(&self, _state: Arc<dyn RunState>) -> Result<RuntimeStream> {
        Err(ParleyError::InvalidState(
            "chat completions runtime never pauses for approval".into(),
        ))
    }

    fn supports_conversation_chaining(&self) -> bool {
        false
    }
}

fn outcome_from(completion: ChatCompletion, response_id: Option<String>, raw_responses: Vec<Value>) -> RunOutcome {
    if !completion.tool_calls.is_empty() {
        warn!(
            count = completion.tool_calls.len(),
            "ignoring tool calls from a runtime without tools"
        );
    }

    let mut message = Map::new();
    message.insert("type".into(), "message".into());
    message.insert("role".into(), "assistant".into());
    message.insert("content".into(), completion.content.clone().into());
    if !completion.reasoning.is_empty() {
        message.insert("reasoning".into(), completion.reasoning.into());
    }
    if !completion.reasoning_details.is_empty() {
        message.insert("reasoning_details".into(), Value::Array(completion.reasoning_details));
    }

    RunOutcome {
        response_id,
        final_output: Some(completion.content),
        new_items: vec![Value::Object(message)],
        usage: completion
            .usage
            .and_then(|usage| serde_json::to_value(usage).ok()),
        raw_responses,
        ..Default::default()
    }
}
