//! Conversation history keyed by chat session.
//!
//! The pipeline itself never mutates history; it reads a snapshot and
//! returns an answer. This store owns the per-session transcripts and is
//! shared by whichever transport is driving the conversation (REPL,
//! Telegram, one-shot ask).

use crate::types::Message;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory session store.
///
/// Callers serialize their own per-session request handling; the store
/// only guarantees that individual operations are atomic.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a session's history. Unknown sessions yield an empty
    /// conversation.
    pub async fn history(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Append a turn, creating the session on first use.
    pub async fn append(&self, session_id: &str, message: Message) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(message);
    }

    /// Begin a session with empty history, discarding any previous turns.
    pub async fn start(&self, session_id: &str) {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), Vec::new());
    }

    /// Drop a session's history entirely. Unknown sessions are a no-op.
    pub async fn reset(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[tokio::test]
    async fn test_history_empty_for_unknown_session() {
        let store = SessionStore::new();
        assert!(store.history("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = SessionStore::new();
        store.append("chat-1", Message::user("What is node X?")).await;
        store
            .append("chat-1", Message::assistant("Node X triggers on schedule."))
            .await;

        let history = store.history("chat-1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "What is node X?");
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = SessionStore::new();
        store.append("chat-1", Message::user("first session")).await;
        store.append("chat-2", Message::user("second session")).await;

        assert_eq!(store.history("chat-1").await.len(), 1);
        assert_eq!(store.history("chat-2").await.len(), 1);
        assert_eq!(store.history("chat-1").await[0].content, "first session");
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let store = SessionStore::new();
        store.append("chat-1", Message::user("hello")).await;
        store.reset("chat-1").await;
        assert!(store.history("chat-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_start_discards_previous_turns() {
        let store = SessionStore::new();
        store.append("chat-1", Message::user("old turn")).await;
        store.start("chat-1").await;
        assert!(store.history("chat-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_history_returns_snapshot() {
        let store = SessionStore::new();
        store.append("chat-1", Message::user("hello")).await;
        let snapshot = store.history("chat-1").await;
        store.append("chat-1", Message::assistant("hi")).await;
        // The earlier snapshot is unaffected by later appends.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.history("chat-1").await.len(), 2);
    }
}
