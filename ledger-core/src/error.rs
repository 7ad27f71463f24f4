//! Error types for the ledger

use crate::types::{ActivityId, EventId, UserId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// A user id supplied by the caller does not resolve in the user directory
    #[error("Invalid reference: user {0} does not exist")]
    InvalidReference(UserId),

    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// Activity not found
    #[error("Activity not found: {0}")]
    ActivityNotFound(ActivityId),

    /// Caller-supplied data failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Arithmetic on stored amounts left the representable range
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Caller is not allowed to perform the operation
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Durable write did not happen; in-memory state is unchanged
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures caused by the caller's input rather than the system
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidReference(_) | Error::InvalidInput(_) | Error::NotPermitted(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
