//! Per-user conversation state.
//!
//! Created on first interaction, mutated by every handled message, and kept
//! until the user sends `/clear`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many recent history entries feed the context summary.
pub const CONTEXT_WINDOW: usize = 5;

/// One writer-mode note: what was said, how it was tagged, and the rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParaphraseRecord {
    pub tag: String,
    pub content: String,
    pub model: String,
    pub transcribed: String,
    pub paraphrased: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    #[serde(default)]
    pub chat_history: Vec<String>,
    #[serde(default)]
    pub writer_mode: bool,
    #[serde(default = "default_true")]
    pub use_context_summary: bool,
    #[serde(default)]
    pub history: Vec<ParaphraseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            chat_history: Vec::new(),
            writer_mode: false,
            use_context_summary: true,
            history: Vec::new(),
            user_full_name: None,
            user_id: None,
        }
    }
}

impl ChatState {
    /// Record who owns this state the first time they are seen.
    pub fn ensure_user(&mut self, user_id: u64, full_name: &str) {
        if self.user_id.is_none() {
            self.user_id = Some(user_id);
        }
        if self.user_full_name.is_none() {
            self.user_full_name = Some(full_name.to_string());
        }
    }

    /// Append an inbound message, preceded by the text it replied to.
    pub fn append_chat_history(&mut self, text: &str, reply_text: Option<&str>) {
        if let Some(reply) = reply_text.filter(|r| !r.is_empty()) {
            self.chat_history.push(reply.to_string());
        }
        self.chat_history.push(text.to_string());
    }

    /// The last few history entries. The stored list is never truncated.
    pub fn recent_history(&self) -> &[String] {
        let start = self.chat_history.len().saturating_sub(CONTEXT_WINDOW);
        &self.chat_history[start..]
    }

    pub fn toggle_writer(&mut self) -> bool {
        self.writer_mode = !self.writer_mode;
        self.writer_mode
    }

    pub fn toggle_context_summary(&mut self) -> bool {
        self.use_context_summary = !self.use_context_summary;
        self.use_context_summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = ChatState::default();
        assert!(!state.writer_mode);
        assert!(state.use_context_summary);
        assert!(state.chat_history.is_empty());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let state: ChatState = serde_json::from_str(r#"{"chat_history": ["hi"]}"#).unwrap();
        assert_eq!(state.chat_history, vec!["hi"]);
        assert!(state.use_context_summary);
        assert!(!state.writer_mode);
    }

    #[test]
    fn test_append_with_reply() {
        let mut state = ChatState::default();
        state.append_chat_history("answer", Some("question"));
        state.append_chat_history("plain", None);
        state.append_chat_history("empty reply", Some(""));
        assert_eq!(state.chat_history, vec!["question", "answer", "plain", "empty reply"]);
    }

    #[test]
    fn test_recent_history_is_a_view() {
        let mut state = ChatState::default();
        for i in 0..8 {
            state.append_chat_history(&i.to_string(), None);
        }
        assert_eq!(state.recent_history(), ["3", "4", "5", "6", "7"]);
        assert_eq!(state.chat_history.len(), 8);

        let short = ChatState {
            chat_history: vec!["a".into()],
            ..Default::default()
        };
        assert_eq!(short.recent_history(), ["a"]);
    }

    #[test]
    fn test_toggles_are_involutions() {
        let mut state = ChatState::default();
        assert!(state.toggle_writer());
        assert!(!state.toggle_writer());
        assert!(!state.toggle_context_summary());
        assert!(state.toggle_context_summary());
        assert_eq!(state, ChatState::default());
    }

    #[test]
    fn test_ensure_user_keeps_first_values() {
        let mut state = ChatState::default();
        state.ensure_user(7, "Ada Lovelace");
        state.ensure_user(8, "Someone Else");
        assert_eq!(state.user_id, Some(7));
        assert_eq!(state.user_full_name.as_deref(), Some("Ada Lovelace"));
    }
}
