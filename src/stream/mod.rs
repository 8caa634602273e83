//! Normalization of raw provider stream events.

pub mod normalize;

pub use normalize::{
    extract_reasoning_delta, extract_text_delta, extract_tool_item, extract_usage,
    usage_from_value, UsageSources,
};
