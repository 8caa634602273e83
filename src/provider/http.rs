//! Shared HTTP client, SSE line parsing, and status mapping.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::error::ParleyError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "falling back to default HTTP client");
                reqwest::Client::new()
            })
    })
}

/// Default headers for a Bearer-token API. An empty key sends no
/// `Authorization` header, for local servers.
pub fn bearer_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// One parsed SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    /// Blank lines, comments, and non-data fields (`event:`, `id:`).
    Skip,
}

/// Classify a single SSE line. Both `data: x` and `data:x` are accepted.
pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    match data.trim() {
        "" => SseLine::Skip,
        "[DONE]" => SseLine::Done,
        _ => SseLine::Data(data),
    }
}

/// Splits a response body into lines. Bytes are held until a full line
/// arrives, so a UTF-8 character split across network chunks is decoded
/// whole.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// The next complete line, newline included.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|byte| *byte == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> ParleyError {
    match status {
        401 | 403 => ParleyError::Authentication(body.to_string()),
        429 => ParleyError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => ParleyError::api(status, error_message(body)),
    }
}

/// Prefer `error.message` from a JSON error body over the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_are_classified() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data:{\"a\":1}\r"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message"), SseLine::Skip);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let body = "data: {\"content\":\"héllo 世界 👋\"}\n\ndata: [DONE]\n".as_bytes();
        let split = body.iter().position(|b| *b == 0xe4).unwrap() + 1;
        let mut buffer = SseLineBuffer::default();
        buffer.push(&body[..split]);
        assert_eq!(buffer.next_line(), None);
        buffer.push(&body[split..]);

        let first = buffer.next_line().unwrap();
        assert_eq!(parse_sse_line(&first), SseLine::Data("{\"content\":\"héllo 世界 👋\"}"));
        assert_eq!(parse_sse_line(&buffer.next_line().unwrap()), SseLine::Skip);
        assert_eq!(parse_sse_line(&buffer.next_line().unwrap()), SseLine::Done);
        assert_eq!(buffer.next_line(), None);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_to_error(401, "nope"),
            ParleyError::Authentication(_)
        ));
        assert!(matches!(
            status_to_error(429, r#"{"error":{"retry_after":1.5}}"#),
            ParleyError::RateLimited {
                retry_after_ms: Some(1500)
            }
        ));
        match status_to_error(400, r#"{"error":{"message":"bad model"}}"#) {
            ParleyError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad model");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_key_sends_no_authorization() {
        assert!(bearer_headers(Some("")).get(AUTHORIZATION).is_none());
        assert_eq!(
            bearer_headers(Some("k")).get(AUTHORIZATION).unwrap(),
            "Bearer k"
        );
    }
}
