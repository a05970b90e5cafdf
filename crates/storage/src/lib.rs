//! Entity persistence for PulseChat.
//!
//! [`SqliteStore`] implements `pulsechat_core::EntityStore` on a single
//! SQLite database created on first use.

pub mod sqlite;

pub use sqlite::SqliteStore;
