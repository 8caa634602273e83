//! Per-tool formatting policy for command messages.
//!
//! Each tool family turns `{tool_name, arguments, output}` into the command
//! line and output text shown to the user. Unknown tools fall back to a
//! generic JSON rendering of their arguments.

use serde_json::Value;

use super::arguments::ToolArguments;
use crate::util::json::coerce_text;

/// Display form of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedCommand {
    pub command: String,
    pub output: String,
}

/// Formatting policy owned by one tool family.
pub trait ToolFormatter: Send + Sync {
    /// Whether this policy handles the named tool.
    fn handles(&self, tool_name: &str) -> bool;

    /// Render the invocation. Must return a non-empty command.
    fn format(&self, tool_name: &str, args: &ToolArguments, output: &str) -> FormattedCommand;
}

/// Shell execution tools: the command line itself.
pub struct ShellFormatter;

/// Search tools: a `grep` invocation equivalent.
pub struct SearchFormatter;

/// Any other tool: `<name> <json args>`.
pub struct GenericFormatter;

impl ToolFormatter for ShellFormatter {
    fn handles(&self, tool_name: &str) -> bool {
        matches!(
            tool_name,
            "shell" | "bash" | "exec" | "execute_command" | "run_shell_command" | "local_shell"
        )
    }

    fn format(&self, tool_name: &str, args: &ToolArguments, output: &str) -> FormattedCommand {
        let command = match args {
            ToolArguments::Raw(raw) => raw.clone(),
            _ => match args.get_any(&["command", "cmd"]) {
                Some(Value::String(line)) => line.clone(),
                Some(Value::Array(argv)) => argv
                    .iter()
                    .filter_map(Value::as_str)
                    .map(quote_arg)
                    .collect::<Vec<_>>()
                    .join(" "),
                _ => GenericFormatter.format(tool_name, args, output).command,
            },
        };
        FormattedCommand {
            command: non_empty(command, tool_name),
            output: output.to_string(),
        }
    }
}

impl ToolFormatter for SearchFormatter {
    fn handles(&self, tool_name: &str) -> bool {
        matches!(tool_name, "search" | "grep" | "search_files" | "ripgrep")
    }

    fn format(&self, tool_name: &str, args: &ToolArguments, output: &str) -> FormattedCommand {
        let command = match args.get_any(&["pattern", "query", "regex"]).and_then(coerce_text) {
            Some(pattern) => {
                let path = args
                    .get_any(&["path", "directory", "dir"])
                    .and_then(coerce_text)
                    .unwrap_or_else(|| ".".to_string());
                let mut command = format!("grep \"{pattern}\" \"{path}\"");
                if let Some(include) = args
                    .get_any(&["include", "glob", "file_pattern"])
                    .and_then(coerce_text)
                {
                    command.push_str(&format!(" --include \"{include}\""));
                }
                command
            }
            None => format!("grep {}", args.render()),
        };
        FormattedCommand {
            command: non_empty(command, tool_name),
            output: output.to_string(),
        }
    }
}

impl ToolFormatter for GenericFormatter {
    fn handles(&self, _tool_name: &str) -> bool {
        true
    }

    fn format(&self, tool_name: &str, args: &ToolArguments, output: &str) -> FormattedCommand {
        FormattedCommand {
            command: non_empty(format!("{tool_name} {}", args.render()), tool_name),
            output: output.to_string(),
        }
    }
}

const FORMATTERS: [&dyn ToolFormatter; 3] = [&ShellFormatter, &SearchFormatter, &GenericFormatter];

/// Format an invocation with the first policy that handles the tool.
pub fn format_command(tool_name: &str, args: &ToolArguments, output: &str) -> FormattedCommand {
    FORMATTERS
        .iter()
        .find(|formatter| formatter.handles(tool_name))
        .map(|formatter| formatter.format(tool_name, args, output))
        .unwrap_or_else(|| GenericFormatter.format(tool_name, args, output))
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

fn non_empty(command: String, tool_name: &str) -> String {
    if command.trim().is_empty() {
        if tool_name.is_empty() {
            "unknown".to_string()
        } else {
            tool_name.to_string()
        }
    } else {
        command
    }
}
