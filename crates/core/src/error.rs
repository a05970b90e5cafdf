//! Error types for the PulseChat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all PulseChat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Validation errors ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the external language-model service.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed completion: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a fresh attempt could plausibly succeed.
    ///
    /// Authentication failures, malformed replies and client-side (4xx)
    /// rejections are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_)
            | Self::MalformedResponse(_)
            | Self::NotConfigured(_) => false,
        }
    }
}

/// Failures of the entity persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot write {child}: referenced {parent} '{id}' does not exist")]
    MissingParent {
        child: &'static str,
        parent: &'static str,
        id: String,
    },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("Session '{session_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    #[error("Session '{session_id}' is {status} and accepts no more readings")]
    SessionClosed { session_id: String, status: String },

    #[error("Invalid record: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// A field-level invariant violation on an entity or snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("end_time precedes start_time")]
    EndBeforeStart,

    #[error("Unknown {kind} value: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}
