//! Conversation history trait: per-session dialogue memory.
//!
//! A conversational session is a caller-chosen string key. It is unrelated
//! to the biosignal monitoring [`Session`](crate::schema::Session) entity.
//! Histories are isolated by exact key equality and kept in insertion order.

use async_trait::async_trait;

use crate::message::{Message, Role};

/// Sliding-window cap applied after every append.
pub const DEFAULT_HISTORY_CAP: usize = 20;

/// The session id used when a caller does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Per-session message history with a bounded sliding window.
///
/// Implementations must serialize mutations of the same session id and
/// must not let operations on different ids block each other.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// The maximum number of messages retained per session.
    fn cap(&self) -> usize;

    /// Append one message, creating the history lazily, then trim to `cap`.
    async fn append(&self, session_id: &str, role: Role, content: &str);

    /// Append a user message and the assistant reply as one step, then trim.
    async fn append_exchange(&self, session_id: &str, user: &str, assistant: &str);

    /// The current history, oldest first. Unknown ids yield an empty vec.
    async fn get(&self, session_id: &str) -> Vec<Message>;

    /// Reset a session's history. Unknown ids are a no-op.
    async fn clear(&self, session_id: &str);

    /// Number of messages currently held for a session.
    async fn len(&self, session_id: &str) -> usize {
        self.get(session_id).await.len()
    }

    /// Ids of every session seen so far.
    async fn sessions(&self) -> Vec<String>;
}
