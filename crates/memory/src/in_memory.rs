//! In-memory conversation store with a per-session sliding window.

use async_trait::async_trait;
use pulsechat_core::history::{ConversationStore, DEFAULT_HISTORY_CAP};
use pulsechat_core::message::{Message, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

type History = Arc<Mutex<Vec<Message>>>;

/// Keeps the last `cap` messages of every conversational session.
///
/// The outer map lock is only held long enough to find or create a
/// session's slot, so sessions never wait on each other. Mutations of one
/// session are serialized by that session's own lock.
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, History>>,
    cap: usize,
}

impl InMemoryConversationStore {
    /// A store retaining at most `cap` messages per session (minimum 1).
    pub fn new(cap: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            cap: cap.max(1),
        }
    }

    async fn slot(&self, session_id: &str) -> History {
        if let Some(history) = self.sessions.read().await.get(session_id) {
            return history.clone();
        }
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    async fn existing(&self, session_id: &str) -> Option<History> {
        self.sessions.read().await.get(session_id).cloned()
    }

    fn trim(&self, history: &mut Vec<Message>) {
        if history.len() > self.cap {
            let excess = history.len() - self.cap;
            history.drain(..excess);
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn cap(&self) -> usize {
        self.cap
    }

    async fn append(&self, session_id: &str, role: Role, content: &str) {
        let slot = self.slot(session_id).await;
        let mut history = slot.lock().await;
        history.push(Message::new(role, content));
        self.trim(&mut history);
    }

    async fn append_exchange(&self, session_id: &str, user: &str, assistant: &str) {
        let slot = self.slot(session_id).await;
        let mut history = slot.lock().await;
        history.push(Message::user(user));
        history.push(Message::assistant(assistant));
        self.trim(&mut history);
        debug!(session_id, len = history.len(), "Exchange recorded");
    }

    async fn get(&self, session_id: &str) -> Vec<Message> {
        match self.existing(session_id).await {
            Some(slot) => slot.lock().await.clone(),
            None => Vec::new(),
        }
    }

    async fn clear(&self, session_id: &str) {
        if let Some(slot) = self.existing(session_id).await {
            slot.lock().await.clear();
            debug!(session_id, "History cleared");
        }
    }

    async fn len(&self, session_id: &str) -> usize {
        match self.existing(session_id).await {
            Some(slot) => slot.lock().await.len(),
            None => 0,
        }
    }

    async fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
