//! # PulseChat Core
//!
//! Domain types, traits, and error definitions for the PulseChat biosignal
//! assistant. This crate has **zero framework dependencies**: it defines the
//! entity schema, the analysis snapshot, and the seams that every other
//! crate implements against.
//!
//! ## Seams
//!
//! - [`Provider`]: the external language-model completion service
//! - [`ConversationStore`]: per-session dialogue history
//! - [`EntityStore`]: persistence of users, devices, sessions and their facts
//!
//! Implementations live in their respective crates, so tests can swap in
//! scripted providers and in-memory stores.

pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StorageError, ValidationError};
pub use history::{ConversationStore, DEFAULT_HISTORY_CAP, DEFAULT_SESSION_ID};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, SamplingConfig, Usage};
pub use snapshot::Snapshot;
pub use store::{EntityStore, TableCounts};
