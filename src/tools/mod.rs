//! Tool-side contracts: argument parsing and human-readable formatting.

pub mod arguments;
pub mod format;

pub use arguments::ToolArguments;
pub use format::{format_command, FormattedCommand, ToolFormatter};
