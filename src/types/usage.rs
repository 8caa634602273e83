//! Token usage normalized across provider shapes.

use serde::{Deserialize, Serialize};

/// Token usage for a turn, whatever shape the provider reported it in.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct NormalizedUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl NormalizedUsage {
    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &NormalizedUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(v) = other.cached_tokens {
            *self.cached_tokens.get_or_insert(0) += v;
        }
        if let Some(v) = other.reasoning_tokens {
            *self.reasoning_tokens.get_or_insert(0) += v;
        }
    }

    /// True when no counter carries a value.
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0
            && self.completion_tokens == 0
            && self.total_tokens == 0
            && self.cached_tokens.is_none()
            && self.reasoning_tokens.is_none()
    }
}
