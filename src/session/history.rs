//! # Conversation History
//!
//! The bounded per-session transcript of user and assistant turns that gives
//! the responder its context.
//!
//! ## Bounding:
//! Capped at the most recent 10 turns with FIFO truncation: the oldest turn
//! is evicted first. Order is chronological, never access-based.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum turns retained per session.
pub const MAX_TURNS: usize = 10;

/// How many recent turns are handed to the responder as context.
pub const CONTEXT_TURNS: usize = 6;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Ordered, bounded sequence of conversation turns.
#[derive(Debug)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_max_turns(MAX_TURNS)
    }

    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// Append a turn, evicting the oldest if the cap is exceeded.
    pub fn push(&mut self, role: Role, text: String) {
        self.turns.push_back(Turn { role, text });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// The most recent `n` turns in chronological order.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Short human-readable digest of the last few turns, for logs and the
    /// health endpoint.
    pub fn summary(&self) -> String {
        if self.turns.is_empty() {
            return "No conversation yet.".to_string();
        }

        self.recent(5)
            .iter()
            .map(|turn| {
                let who = match turn.role {
                    Role::User => "You",
                    Role::Assistant => "AI",
                };
                let text = if turn.text.chars().count() > 100 {
                    let prefix: String = turn.text.chars().take(100).collect();
                    format!("{}...", prefix)
                } else {
                    turn.text.clone()
                };
                format!("{}: {}", who, text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_never_exceeds_cap() {
        let mut history = ConversationHistory::new();
        for i in 0..25 {
            history.push(Role::User, format!("turn {}", i));
        }
        assert_eq!(history.len(), MAX_TURNS);

        // Oldest evicted first: the survivors are turns 15..24.
        let turns = history.recent(MAX_TURNS);
        assert_eq!(turns[0].text, "turn 15");
        assert_eq!(turns[9].text, "turn 24");
    }

    #[test]
    fn test_recent_returns_chronological_tail() {
        let mut history = ConversationHistory::new();
        history.push(Role::User, "hello".to_string());
        history.push(Role::Assistant, "hi there".to_string());
        history.push(Role::User, "how are you".to_string());

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, Role::Assistant);
        assert_eq!(recent[1].text, "how are you");

        // Asking for more than exists returns everything.
        assert_eq!(history.recent(50).len(), 3);
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::new();
        history.push(Role::User, "hello".to_string());
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.summary(), "No conversation yet.");
    }

    #[test]
    fn test_summary_truncates_long_turns() {
        let mut history = ConversationHistory::new();
        history.push(Role::Assistant, "x".repeat(150));
        let summary = history.summary();
        assert!(summary.starts_with("AI: "));
        assert!(summary.ends_with("..."));
    }
}
