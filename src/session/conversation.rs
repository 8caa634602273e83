//! Local canonical history of one conversation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::HistoryItem;

/// A history item with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub item: HistoryItem,
    pub recorded_at: DateTime<Utc>,
}

/// Ordered history. Tool calls and tool results are unique per call id.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    entries: Vec<HistoryEntry>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: HistoryItem) {
        self.entries.push(HistoryEntry {
            item,
            recorded_at: Utc::now(),
        });
    }

    /// Append items, skipping tool calls and results whose call id is
    /// already recorded. Returns how many were appended.
    pub fn extend_dedup(&mut self, items: impl IntoIterator<Item = HistoryItem>) -> usize {
        let mut seen: HashSet<(bool, String)> = self
            .entries
            .iter()
            .filter_map(|entry| tool_key(&entry.item))
            .collect();
        let before = self.entries.len();
        for item in items {
            if let Some(key) = tool_key(&item) {
                if !seen.insert(key) {
                    continue;
                }
            }
            self.push(item);
        }
        self.entries.len() - before
    }

    /// Convert raw runtime items and append them.
    pub fn extend_from_raw<'a>(&mut self, raw: impl IntoIterator<Item = &'a Value>) -> usize {
        self.extend_dedup(raw.into_iter().filter_map(HistoryItem::from_raw))
    }

    pub fn items(&self) -> impl Iterator<Item = &HistoryItem> + '_ {
        self.entries.iter().map(|entry| &entry.item)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryItem> {
        self.entries.last().map(|entry| &entry.item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// `(is_result, call_id)` for tool items.
fn tool_key(item: &HistoryItem) -> Option<(bool, String)> {
    match item {
        HistoryItem::ToolCall(call) => Some((false, call.call_id.clone())),
        HistoryItem::ToolResult { call_id, .. } => Some((true, call_id.clone())),
        _ => None,
    }
}
