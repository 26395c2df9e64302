//! Error types for the history store.
//!
//! Absence of a record is never an error: lookups return `Option` / empty
//! collections. Errors here are real failures of the durable medium or of
//! inbound input.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An inbound event is missing required fields or is internally
    /// inconsistent. Rejected before it reaches the diff engine; queues
    /// are untouched.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("invalid store format: {0}")]
    InvalidFormat(String),

    #[error("checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("store is locked by another process")]
    Locked,

    #[error("store not initialized")]
    NotInitialized,

    /// The durable medium cannot be used at all (e.g. no resolvable
    /// storage location).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
