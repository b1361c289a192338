//! Error types for the state store, stream sessions and the reconnecting client.

use crate::types::Timestamp;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be persisted. Nothing was published.
    #[error("Failed to write game state to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Player with ID {0} not found")]
    PlayerNotFound(u32),

    #[error("Duplicate player ID {0}")]
    DuplicatePlayer(u32),

    #[error("Stale write: expected lastUpdated {expected}, found {found}")]
    Conflict { expected: Timestamp, found: Timestamp },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl StoreError {
    /// True when the failure happened while persisting the document.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, StoreError::Write { .. } | StoreError::Serialization(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors raised by a server-side stream session.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(String),

    /// Writing to the transport failed. Fatal for the session that hit it.
    #[error("Failed to emit event: {0}")]
    Emit(#[source] std::io::Error),

    #[error("Session is closed")]
    Closed,
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Encode(e.to_string())
    }
}

/// Errors observed by the reconnecting client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect: {0}")]
    Connect(#[source] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("Malformed {event} payload: {message}")]
    MalformedPayload { event: String, message: String },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
