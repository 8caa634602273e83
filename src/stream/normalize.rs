//! Pure extractors turning one raw provider event into at most one text
//! delta, one reasoning delta, or one usage record.
//!
//! Providers disagree on where these live: typed Responses-style events,
//! chat-completion `choices[].delta` objects (sometimes serialized as an
//! object keyed `"0"`, `"1"`, ...), or loose `delta`/`text`/`content`
//! fields, optionally wrapped in one or more `data` envelopes. Each concern
//! is an ordered chain of extractors; supporting a new shape means adding a
//! function to the chain.

use serde_json::Value;

use crate::types::NormalizedUsage;
use crate::util::json::{any_field, coerce_text, str_field, u64_field, unwrap_raw_item};

type Extractor = fn(&Value) -> Option<String>;

const TEXT_EXTRACTORS: &[Extractor] = &[typed_output_text, chat_choice_content, probed_text_fields];
const REASONING_EXTRACTORS: &[Extractor] = &[typed_reasoning_delta, chat_choice_reasoning];

const MAX_ENVELOPE_DEPTH: usize = 3;

const TOOL_ITEM_TYPES: [&str; 5] = [
    "function_call",
    "function_call_result",
    "function_call_output",
    "tool_call",
    "tool_result",
];

/// Extract a visible text delta from a raw event.
pub fn extract_text_delta(event: &Value) -> Option<String> {
    envelopes(event).find_map(|layer| TEXT_EXTRACTORS.iter().find_map(|extract| extract(layer)))
}

/// Extract a reasoning ("thinking") delta from a raw event.
///
/// Whitespace-only deltas carry no information and are suppressed.
pub fn extract_reasoning_delta(event: &Value) -> Option<String> {
    envelopes(event)
        .find_map(|layer| REASONING_EXTRACTORS.iter().find_map(|extract| extract(layer)))
        .filter(|delta| !delta.trim().is_empty())
}

/// The event itself followed by its nested `data` envelopes.
fn envelopes(event: &Value) -> impl Iterator<Item = &Value> {
    std::iter::successors(Some(event), |layer| {
        layer.get("data").filter(|inner| inner.is_object())
    })
    .take(MAX_ENVELOPE_DEPTH)
}

fn event_type(layer: &Value) -> &str {
    str_field(layer, &["type"]).unwrap_or("")
}

/// Types whose payload fields must never be read as assistant text.
fn is_non_text_type(kind: &str) -> bool {
    const BLOCKED: [&str; 6] = [
        "reasoning",
        "function_call",
        "arguments",
        "tool",
        "run_item",
        "agent_updated",
    ];
    BLOCKED.iter().any(|marker| kind.contains(marker))
        || kind.ends_with(".done")
        || kind.ends_with("_done")
        || kind.contains("completed")
}

fn typed_output_text(layer: &Value) -> Option<String> {
    let kind = event_type(layer);
    if !(kind.contains("output_text") && kind.contains("delta")) {
        return None;
    }
    layer.get("delta").and_then(coerce_text)
}

fn chat_choice_content(layer: &Value) -> Option<String> {
    if is_non_text_type(event_type(layer)) {
        return None;
    }
    choice_delta(layer)?.get("content").and_then(coerce_text)
}

fn probed_text_fields(layer: &Value) -> Option<String> {
    if is_non_text_type(event_type(layer)) {
        return None;
    }
    ["delta", "output_text", "text", "content"]
        .iter()
        .find_map(|field| layer.get(*field).and_then(coerce_text))
}

fn typed_reasoning_delta(layer: &Value) -> Option<String> {
    let kind = event_type(layer);
    if !(kind.contains("reasoning") && kind.contains("delta")) {
        return None;
    }
    any_field(layer, &["delta", "text"]).and_then(coerce_text)
}

fn chat_choice_reasoning(layer: &Value) -> Option<String> {
    let delta = choice_delta(layer).or_else(|| layer.get("delta").filter(|d| d.is_object()))?;
    if let Some(text) = any_field(delta, &["reasoning_content", "reasoning"]).and_then(coerce_text) {
        return Some(text);
    }
    let details = delta.get("reasoning_details")?.as_array()?;
    let text: String = details
        .iter()
        .filter_map(|detail| any_field(detail, &["text", "summary"]).and_then(coerce_text))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// `delta` of the first choice, whether `choices` is an array or an object
/// keyed by stringified indices.
fn choice_delta(layer: &Value) -> Option<&Value> {
    let choice = match layer.get("choices")? {
        Value::Array(choices) => choices.first()?,
        Value::Object(by_index) => by_index
            .iter()
            .filter_map(|(key, choice)| key.parse::<usize>().ok().map(|idx| (idx, choice)))
            .min_by_key(|(idx, _)| *idx)
            .map(|(_, choice)| choice)?,
        _ => return None,
    };
    choice.get("delta").filter(|delta| delta.is_object())
}

/// Unwrap a tool invocation or tool result item carried by a run-item
/// stream event (or by the event itself).
pub fn extract_tool_item(event: &Value) -> Option<&Value> {
    let candidate = match event.get("item").filter(|item| item.is_object()) {
        Some(item) => unwrap_raw_item(item),
        None => unwrap_raw_item(event),
    };
    let kind = event_type(candidate);
    TOOL_ITEM_TYPES.contains(&kind).then_some(candidate)
}

/// Where usage may have been reported for one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSources<'a> {
    pub event: Option<&'a Value>,
    pub completed: Option<&'a Value>,
    pub stream: Option<&'a Value>,
    pub raw_responses: &'a [Value],
}

/// Probe every usage location in order, returning the first hit.
///
/// Trailing raw responses are checked last-to-first.
pub fn extract_usage(sources: &UsageSources<'_>) -> Option<NormalizedUsage> {
    [sources.event, sources.completed, sources.stream]
        .into_iter()
        .flatten()
        .find_map(usage_from_value)
        .or_else(|| sources.raw_responses.iter().rev().find_map(usage_from_value))
}

/// Normalize usage found on `value` (as `usage`, `response.usage`, or the
/// value itself being a usage object).
pub fn usage_from_value(value: &Value) -> Option<NormalizedUsage> {
    let candidates = [
        value.get("usage"),
        value.get("response").and_then(|r| r.get("usage")),
        Some(value),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter(|candidate| candidate.is_object())
        .find_map(normalize_usage)
}

fn normalize_usage(usage: &Value) -> Option<NormalizedUsage> {
    let prompt = u64_field(usage, &["prompt_tokens", "input_tokens", "promptTokens", "inputTokens"]);
    let completion = u64_field(
        usage,
        &["completion_tokens", "output_tokens", "completionTokens", "outputTokens"],
    );
    let total = u64_field(usage, &["total_tokens", "totalTokens"]);
    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }
    let prompt_tokens = prompt.unwrap_or(0);
    let completion_tokens = completion.unwrap_or(0);

    let cached_tokens = ["prompt_tokens_details", "input_tokens_details", "inputTokensDetails"]
        .iter()
        .find_map(|key| usage.get(*key).and_then(|d| u64_field(d, &["cached_tokens", "cachedTokens"])))
        .or_else(|| u64_field(usage, &["cache_read_input_tokens"]));
    let reasoning_tokens = [
        "completion_tokens_details",
        "output_tokens_details",
        "outputTokensDetails",
    ]
    .iter()
    .find_map(|key| {
        usage
            .get(*key)
            .and_then(|d| u64_field(d, &["reasoning_tokens", "reasoningTokens"]))
    });

    Some(NormalizedUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: total.unwrap_or(prompt_tokens + completion_tokens),
        cached_tokens,
        reasoning_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn text_from_typed_responses_event_inside_data_envelope() {
        let event = json!({
            "type": "raw_model_stream_event",
            "data": {"type": "output_text_delta", "delta": "Hel"},
        });
        assert_eq!(extract_text_delta(&event).as_deref(), Some("Hel"));
        assert_eq!(extract_reasoning_delta(&event), None);
    }

    #[test]
    fn text_from_chat_choices_array_and_keyed_object() {
        let array = json!({"choices": [{"delta": {"content": "a"}}]});
        let keyed = json!({"choices": {"1": {"delta": {"content": "z"}}, "0": {"delta": {"content": "b"}}}});
        assert_eq!(extract_text_delta(&array).as_deref(), Some("a"));
        assert_eq!(extract_text_delta(&keyed).as_deref(), Some("b"));
    }

    #[test]
    fn text_probe_coerces_part_arrays() {
        let event = json!({"content": [{"type": "text", "text": "x"}, {"value": "y"}]});
        assert_eq!(extract_text_delta(&event).as_deref(), Some("xy"));
    }

    #[test]
    fn done_and_reasoning_events_are_not_text() {
        let done = json!({"type": "response.output_text.done", "text": "full answer"});
        assert_eq!(extract_text_delta(&done), None);
        let reasoning = json!({"type": "response.reasoning_text.delta", "delta": "hmm"});
        assert_eq!(extract_text_delta(&reasoning), None);
        assert_eq!(extract_reasoning_delta(&reasoning).as_deref(), Some("hmm"));
        let args = json!({"type": "response.function_call_arguments.delta", "delta": "{\"a\""});
        assert_eq!(extract_text_delta(&args), None);
    }

    #[test]
    fn reasoning_from_chat_delta_fields() {
        let content = json!({"choices": [{"delta": {"reasoning_content": "think"}}]});
        let keyed = json!({"choices": {"0": {"delta": {"reasoning": "ing"}}}});
        let details = json!({"choices": [{"delta": {"reasoning_details": [{"type": "reasoning.text", "text": "deep"}]}}]});
        assert_eq!(extract_reasoning_delta(&content).as_deref(), Some("think"));
        assert_eq!(extract_reasoning_delta(&keyed).as_deref(), Some("ing"));
        assert_eq!(extract_reasoning_delta(&details).as_deref(), Some("deep"));
        assert_eq!(extract_text_delta(&content), None);
    }

    #[test]
    fn whitespace_reasoning_is_suppressed() {
        let event = json!({"choices": [{"delta": {"reasoning_content": "\n  \n"}}]});
        assert_eq!(extract_reasoning_delta(&event), None);
    }

    #[test]
    fn usage_sources_are_probed_in_order() {
        let raw = vec![
            json!({"usage": {"input_tokens": 1, "output_tokens": 1}}),
            json!({"usage": {"input_tokens": 7, "output_tokens": 3, "output_tokens_details": {"reasoning_tokens": 2}}}),
        ];
        let only_raw = UsageSources {
            raw_responses: &raw,
            ..Default::default()
        };
        let usage = extract_usage(&only_raw).unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.total_tokens, 10);
        assert_eq!(usage.reasoning_tokens, Some(2));

        let completed = json!({"response": {"usage": {"prompt_tokens": 100, "completion_tokens": 5, "total_tokens": 105}}});
        let with_completed = UsageSources {
            completed: Some(&completed),
            raw_responses: &raw,
            ..Default::default()
        };
        assert_eq!(extract_usage(&with_completed).unwrap().total_tokens, 105);
        assert_eq!(extract_usage(&UsageSources::default()), None);
    }

    #[test]
    fn tool_items_are_unwrapped_from_run_item_events() {
        let event = json!({
            "type": "run_item_stream_event",
            "name": "tool_called",
            "item": {"type": "tool_call_item", "rawItem": {"type": "function_call", "callId": "c1"}},
        });
        assert_eq!(extract_tool_item(&event).unwrap()["callId"], "c1");
        assert!(extract_tool_item(&json!({"type": "output_text_delta", "delta": "x"})).is_none());
    }
}
