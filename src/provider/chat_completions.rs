//! Streaming chat-completions client for providers without server-side
//! conversation threading.

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{
    bearer_headers, parse_sse_line, shared_client, status_to_error, SseLine, SseLineBuffer,
};
use super::sse::{ChatCompletion, SseAccumulator};
use crate::error::{ParleyError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A chat-completions endpoint bound to one model.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    base_url: String,
    api_key: Option<String>,
    model_id: String,
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.model_id = model_id.into();
    }

    pub fn build_request_body(&self, messages: &[Value], tools: &[Value], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model_id,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    /// POST a streaming request and yield each parsed `data:` chunk until
    /// `[DONE]` or the end of the body.
    pub async fn stream_chunks(
        &self,
        messages: &[Value],
        tools: &[Value],
    ) -> Result<BoxStream<'static, Result<Value>>> {
        let body = self.build_request_body(messages, tools, true);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = self.model_id.as_str(), messages = messages.len(), "chat completions stream");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(self.api_key.as_deref()))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::default();
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(ParleyError::Network(e));
                        break;
                    }
                };
                lines.push(&bytes);

                while let Some(line) = lines.next_line() {
                    match parse_sse_line(&line) {
                        SseLine::Done => break 'read,
                        SseLine::Skip => {}
                        SseLine::Data(data) => match serde_json::from_str::<Value>(data) {
                            Ok(chunk) => yield Ok(chunk),
                            Err(err) => debug!(error = %err, "skipping unparseable SSE chunk"),
                        },
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Drain a streaming request into one assembled completion.
    pub async fn complete(&self, messages: &[Value], tools: &[Value]) -> Result<ChatCompletion> {
        let mut chunks = self.stream_chunks(messages, tools).await?;
        let mut accumulator = SseAccumulator::new();
        while let Some(chunk) = chunks.next().await {
            accumulator.push(&chunk?);
        }
        Ok(accumulator.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_body_includes_tools_and_usage_option() {
        let client = ChatCompletionsClient::new(None, None, "deepseek-chat");
        let messages = vec![json!({"role": "user", "content": "hi"})];
        let body = client.build_request_body(&messages, &[], true);
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("tools").is_none());

        let tool = json!({"type": "function", "function": {"name": "shell"}});
        let body = client.build_request_body(&messages, &[tool.clone()], false);
        assert_eq!(body["tools"], json!([tool]));
        assert!(body.get("stream_options").is_none());
    }
}
