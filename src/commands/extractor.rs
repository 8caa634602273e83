//! Command message extraction.
//!
//! Tool invocations and their results usually arrive in separate events,
//! and only the invocation carries the arguments. Arguments are therefore
//! cached by call id the moment an invocation is seen and looked up again
//! when the result is formatted.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::tools::{format_command, ToolArguments};
use crate::types::{CommandMessage, CommandStatus};
use crate::util::json::{any_field, coerce_text, str_field, unwrap_raw_item};

/// Prefix of every synthetic tool result produced by a rejected approval.
pub const REJECTION_MARKER: &str = "Tool call rejected by the user";

/// Raw tool arguments keyed by call id.
pub type ArgumentCache = HashMap<String, Value>;

/// Observability record for degraded extraction paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Arguments were present but not valid JSON; rendered opaquely.
    MalformedArguments {
        call_id: String,
        tool_name: String,
        raw: String,
    },
}

enum ItemKind {
    Invocation,
    Result,
}

fn classify(item: &Value) -> Option<ItemKind> {
    match str_field(item, &["type"])? {
        "function_call" | "tool_call" => Some(ItemKind::Invocation),
        "function_call_result" | "function_call_output" | "tool_result" => Some(ItemKind::Result),
        _ => None,
    }
}

fn call_id_of(item: &Value) -> Option<&str> {
    str_field(item, &["call_id", "callId", "tool_call_id", "id"])
}

fn is_flagged_rejection(item: &Value) -> bool {
    any_field(item, &["is_approval_rejection", "isApprovalRejection"])
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Stateful extractor owned by one session.
#[derive(Debug, Default)]
pub struct CommandExtractor {
    arguments: ArgumentCache,
    tool_names: HashMap<String, String>,
    reported_malformed: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl CommandExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache the arguments of a tool invocation item. Returns the call id
    /// and tool name when the item is an invocation.
    pub fn observe_invocation(&mut self, raw: &Value) -> Option<(String, String)> {
        let item = unwrap_raw_item(raw);
        if !matches!(classify(item), Some(ItemKind::Invocation)) {
            return None;
        }
        let call_id = call_id_of(item)?.to_string();
        let name = str_field(item, &["name", "tool_name"]).unwrap_or("unknown").to_string();
        if let Some(arguments) = any_field(item, &["arguments", "args"]) {
            let is_blank = arguments.as_str().is_some_and(|s| s.trim().is_empty());
            if !is_blank || !self.arguments.contains_key(&call_id) {
                self.arguments.insert(call_id.clone(), arguments.clone());
            }
        }
        self.tool_names.insert(call_id.clone(), name.clone());
        Some((call_id, name))
    }

    /// Cached raw arguments for a call id.
    pub fn cached_arguments(&self, call_id: &str) -> Option<&Value> {
        self.arguments.get(call_id)
    }

    /// Produce command messages for result items not yet emitted.
    ///
    /// Invocation items only feed the argument cache. Items whose id is in
    /// `emitted` and items pre-flagged as approval rejections are skipped.
    pub fn extract<'a>(
        &mut self,
        items: impl IntoIterator<Item = &'a Value>,
        emitted: &HashSet<String>,
    ) -> Vec<CommandMessage> {
        let mut messages = Vec::new();
        let mut seen_now: HashSet<String> = HashSet::new();
        for raw in items {
            let item = unwrap_raw_item(raw);
            match classify(item) {
                Some(ItemKind::Invocation) => {
                    self.observe_invocation(item);
                }
                Some(ItemKind::Result) => {
                    if is_flagged_rejection(raw) || is_flagged_rejection(item) {
                        continue;
                    }
                    let Some(call_id) = call_id_of(item) else {
                        continue;
                    };
                    if emitted.contains(call_id) || !seen_now.insert(call_id.to_string()) {
                        continue;
                    }
                    messages.push(self.format_result(call_id, item));
                }
                None => {}
            }
        }
        messages
    }

    fn format_result(&mut self, call_id: &str, item: &Value) -> CommandMessage {
        let tool_name = str_field(item, &["name", "tool_name"])
            .map(str::to_string)
            .or_else(|| self.tool_names.get(call_id).cloned())
            .unwrap_or_else(|| "unknown".to_string());
        let raw_args = any_field(item, &["arguments", "args"])
            .or_else(|| self.arguments.get(call_id))
            .cloned();
        let args = ToolArguments::from_value(raw_args.as_ref());
        if let ToolArguments::Raw(raw) = &args {
            self.report_malformed(call_id, &tool_name, raw);
        }

        let output = item.get("output").and_then(coerce_text).unwrap_or_default();
        let failure_reason = failure_reason(item);
        let formatted = format_command(&tool_name, &args, &output);
        let is_approval_rejection = output.starts_with(REJECTION_MARKER);

        CommandMessage {
            id: call_id.to_string(),
            status: if failure_reason.is_some() {
                CommandStatus::Failed
            } else {
                CommandStatus::Completed
            },
            command: formatted.command,
            output: formatted.output,
            success: Some(failure_reason.is_none()),
            failure_reason,
            is_approval_rejection,
            call_id: Some(call_id.to_string()),
            tool_name: Some(tool_name),
            tool_args: raw_args.map(|_| args.to_value()),
        }
    }

    fn report_malformed(&mut self, call_id: &str, tool_name: &str, raw: &str) {
        if !self.reported_malformed.insert(call_id.to_string()) {
            return;
        }
        warn!(
            call_id,
            tool_name,
            "tool arguments are not valid JSON; rendering them verbatim"
        );
        self.diagnostics.push(Diagnostic::MalformedArguments {
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            raw: raw.to_string(),
        });
    }

    /// Drain diagnostics recorded since the last call.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Copy of the argument cache, for approval carry-over.
    pub fn snapshot_arguments(&self) -> ArgumentCache {
        self.arguments.clone()
    }

    /// Replace the argument cache verbatim.
    pub fn restore_arguments(&mut self, arguments: ArgumentCache) {
        self.arguments = arguments;
    }

    pub fn reset(&mut self) {
        self.arguments.clear();
        self.tool_names.clear();
        self.reported_malformed.clear();
        self.diagnostics.clear();
    }
}

fn failure_reason(item: &Value) -> Option<String> {
    if let Some(status) = str_field(item, &["status"]) {
        if matches!(status, "failed" | "error" | "incomplete") {
            return Some(
                item.get("error")
                    .and_then(coerce_text)
                    .unwrap_or_else(|| format!("tool call {status}")),
            );
        }
    }
    let output = item.get("output")?;
    if str_field(output, &["type"]) == Some("error") {
        return Some(coerce_text(output).unwrap_or_else(|| "tool error".to_string()));
    }
    output.get("error").and_then(coerce_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn shell_call(id: &str, args: Value) -> Value {
        json!({"type": "function_call", "callId": id, "name": "shell", "arguments": args})
    }

    fn result(id: &str, output: &str) -> Value {
        json!({"type": "function_call_result", "callId": id, "output": {"type": "text", "text": output}})
    }

    #[test]
    fn result_uses_arguments_cached_from_earlier_invocation() {
        let mut extractor = CommandExtractor::new();
        extractor.observe_invocation(&shell_call("c1", json!("{\"command\":\"ls -la\"}")));

        let messages = extractor.extract([&result("c1", "a.txt")], &HashSet::new());
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.id, "c1");
        assert_eq!(msg.command, "ls -la");
        assert_eq!(msg.output, "a.txt");
        assert_eq!(msg.status, CommandStatus::Completed);
        assert_eq!(msg.tool_name.as_deref(), Some("shell"));
        assert!(!msg.is_approval_rejection);
    }

    #[test]
    fn emitted_and_repeated_ids_are_skipped() {
        let mut extractor = CommandExtractor::new();
        let items = [shell_call("c1", json!({"command": "pwd"})), result("c1", "/"), result("c1", "/")];
        let messages = extractor.extract(items.iter(), &HashSet::new());
        assert_eq!(messages.len(), 1);

        let emitted: HashSet<String> = ["c1".to_string()].into();
        assert!(extractor.extract(items.iter(), &emitted).is_empty());
    }

    #[test]
    fn flagged_rejections_are_skipped_and_marker_outputs_are_marked() {
        let mut extractor = CommandExtractor::new();
        let flagged = json!({"type": "function_call_result", "callId": "c1", "output": "x", "isApprovalRejection": true});
        assert!(extractor.extract([&flagged], &HashSet::new()).is_empty());

        let synthetic = result("c2", &format!("{REJECTION_MARKER}. Reason: bad idea"));
        let messages = extractor.extract([&synthetic], &HashSet::new());
        assert!(messages[0].is_approval_rejection);
        assert!(!messages[0].is_visible());
    }

    #[test]
    fn malformed_arguments_degrade_and_report_once() {
        let mut extractor = CommandExtractor::new();
        extractor.observe_invocation(&shell_call("c1", json!("{\"command\": \"ls")));

        let first = extractor.extract([&result("c1", "")], &HashSet::new());
        assert_eq!(first[0].command, "{\"command\": \"ls");
        let again = extractor.extract([&result("c1", "")], &HashSet::new());
        assert_eq!(again.len(), 1);

        let diagnostics = extractor.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(&diagnostics[0], Diagnostic::MalformedArguments { call_id, .. } if call_id == "c1"));
        assert!(extractor.take_diagnostics().is_empty());
    }

    #[test]
    fn missing_arguments_fall_back_to_unknown() {
        let mut extractor = CommandExtractor::new();
        let orphan = json!({"type": "function_call_result", "callId": "zz", "name": "fetch", "output": "ok"});
        let messages = extractor.extract([&orphan], &HashSet::new());
        assert_eq!(messages[0].command, "fetch unknown");
        assert_eq!(messages[0].tool_args, None);
    }

    #[test]
    fn failed_status_produces_failed_message() {
        let mut extractor = CommandExtractor::new();
        let failed = json!({"type": "function_call_output", "call_id": "c9", "status": "failed", "error": "exit 1", "output": ""});
        let messages = extractor.extract([&failed], &HashSet::new());
        assert_eq!(messages[0].status, CommandStatus::Failed);
        assert_eq!(messages[0].success, Some(false));
        assert_eq!(messages[0].failure_reason.as_deref(), Some("exit 1"));
    }

    #[test]
    fn snapshot_and_restore_round_trip_the_cache() {
        let mut extractor = CommandExtractor::new();
        extractor.observe_invocation(&shell_call("c1", json!({"command": "ls"})));
        let snapshot = extractor.snapshot_arguments();
        extractor.reset();
        assert!(extractor.cached_arguments("c1").is_none());
        extractor.restore_arguments(snapshot);
        assert_eq!(extractor.cached_arguments("c1"), Some(&json!({"command": "ls"})));
    }
}
