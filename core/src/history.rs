//! Per-conversation history of recent turns.
//!
//! Each conversation (a text channel, usually) keeps a short sliding window
//! of user/bot exchanges that is rendered into the next prompt. The window is
//! a strict FIFO: once full, the oldest turn is dropped on every append.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Number of turns kept per conversation unless configured otherwise.
pub const DEFAULT_HISTORY_TURNS: usize = 3;

/// One user input and the bot's reply to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_text: String,
    pub bot_text: String,
}

impl ConversationTurn {
    pub fn new(user_text: impl Into<String>, bot_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            bot_text: bot_text.into(),
        }
    }
}

/// Bounded turn cache keyed by conversation id.
///
/// Entries live for the lifetime of the cache. Appends to one key are
/// applied under that entry's lock; different keys never contend beyond
/// sharing a shard.
#[derive(Debug)]
pub struct ConversationHistory {
    capacity: usize,
    turns: DashMap<String, VecDeque<ConversationTurn>>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_TURNS)
    }

    /// Create a cache keeping at most `capacity` turns per conversation
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            turns: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Recent turns for `key`, oldest first. Empty for unknown keys.
    pub fn get_recent(&self, key: &str) -> Vec<ConversationTurn> {
        self.turns
            .get(key)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a completed turn and evict from the front down to capacity
    pub fn record(&self, key: &str, user_text: impl Into<String>, bot_text: impl Into<String>) {
        let mut entry = self.turns.entry(key.to_string()).or_default();
        entry.push_back(ConversationTurn::new(user_text, bot_text));
        while entry.len() > self.capacity {
            entry.pop_front();
        }
        debug!(target: "history", key, turns = entry.len(), "Recorded conversation turn");
    }

    /// Number of conversations tracked
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_unknown_key_is_empty() {
        let history = ConversationHistory::new();
        assert!(history.get_recent("nowhere").is_empty());
        assert!(history.is_empty());
    }

    #[test]
    fn test_keys_are_independent() {
        let history = ConversationHistory::with_capacity(2);
        history.record("a", "1", "one");
        history.record("a", "2", "two");
        history.record("a", "3", "three");
        history.record("b", "x", "ex");

        assert_eq!(history.len(), 2);
        assert_eq!(history.get_recent("a").len(), 2);
        assert_eq!(history.get_recent("a")[0].user_text, "2");
        assert_eq!(history.get_recent("b"), vec![ConversationTurn::new("x", "ex")]);
    }

    #[test]
    fn test_concurrent_appends_on_one_key_are_not_lost() {
        let history = Arc::new(ConversationHistory::with_capacity(1000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let history = Arc::clone(&history);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        history.record("shared", format!("{t}-{i}"), "ok");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(history.get_recent("shared").len(), 400);
    }
}
