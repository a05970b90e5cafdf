//! Conversation memory for PulseChat.
//!
//! Histories live in process memory and are lost on restart.

pub mod in_memory;

pub use in_memory::InMemoryConversationStore;
