//! SDK error types.

use thiserror::Error;

use crate::state::DataFlowState;

/// Boxed error returned by user-installed handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the data plane SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The payload could not be parsed at all.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The payload parsed but violates a message invariant.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No flow exists for the referenced process id.
    #[error("data flow not found: {0}")]
    NotFound(String),

    /// A flow with this id already exists.
    #[error("data flow already exists: {0}")]
    AlreadyExists(String),

    /// The state machine rejected the requested transition.
    #[error("data flow {id} cannot transition from {from} to {to}")]
    TransitionForbidden {
        id: String,
        from: DataFlowState,
        to: DataFlowState,
    },

    /// An installed handler failed; the enclosing transaction is rolled back.
    #[error("handler failed for data flow {id}: {source}")]
    Handler {
        id: String,
        #[source]
        source: HandlerError,
    },

    /// A persistence failure outside the database driver.
    #[error("store error: {0}")]
    Store(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request context was cancelled before the operation could run.
    #[error("operation cancelled")]
    Cancelled,

    /// The recovery sweep finished with per-flow failures.
    #[error("recovery failed for {} data flow(s): {}", .failures.len(), .failures.join("; "))]
    Recovery { failures: Vec<String> },

    /// The SDK builder was not fully configured.
    #[error("invalid SDK configuration: {0}")]
    Configuration(String),
}

impl SdkError {
    /// Wraps a user handler failure with the owning flow id.
    pub fn handler(id: impl Into<String>, source: impl Into<HandlerError>) -> Self {
        SdkError::Handler {
            id: id.into(),
            source: source.into(),
        }
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
