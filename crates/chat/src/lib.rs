//! Conversational engine for PulseChat.
//!
//! - [`context`] renders a biosignal [`Snapshot`](pulsechat_core::Snapshot)
//!   into the text block the model is grounded on
//! - [`engine`] runs one turn: history, context, completion, bookkeeping

pub mod context;
pub mod engine;
pub mod prompt;

#[cfg(test)]
mod test_helpers;

pub use context::{render_snapshot, ContextError, CONTEXT_PREAMBLE};
pub use engine::{
    ChatEngine, ChatError, ChatFailure, ChatOutcome, ChatReply, ChatRequest, APOLOGY,
};
pub use prompt::SYSTEM_PROMPT;
