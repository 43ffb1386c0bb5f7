//! Error types for live data operations.
//!
//! Transport failures never show up here: the reconnecting stream absorbs
//! them into state transitions. What remains are errors a single awaiting
//! caller can act on.

use thiserror::Error;

/// Main error type for live data operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LiveError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid modifier: {0}")]
    InvalidModifier(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Unknown publication: {0}")]
    UnknownPublication(String),

    #[error("Stream is shut down")]
    StreamClosed,

    #[error("Driver dropped the call without answering")]
    CallAbandoned,
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::Serialization(e.to_string())
    }
}

/// Result type for live data operations.
pub type Result<T> = std::result::Result<T, LiveError>;
