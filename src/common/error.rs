//! Error types for repliq

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Send path ===
    #[error("error on sending distributed request for database '{database}': {reason}")]
    SendFailed { database: String, reason: String },

    #[error("no response received from any of nodes [{nodes}] for request {request}")]
    NoResponse { request: String, nodes: String },

    #[error("cannot dispatch response to {node}#{session}: {reason}")]
    DispatchFailed {
        node: String,
        session: u64,
        reason: String,
    },

    // === Store ===
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict on {rid}: expected v{expected}, got v{actual}")]
    VersionConflict {
        rid: String,
        expected: u64,
        actual: u64,
    },

    // === Cluster / configuration ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown partitioning strategy: {0}")]
    UnknownStrategy(String),

    #[error("no partition owns '{database}.{cluster}'")]
    NoPartition { database: String, cluster: String },

    #[error("database not configured: {0}")]
    NotConfigured(String),

    // === Substrate ===
    #[error("queue offer timed out after {0:?}")]
    QueueTimeout(Duration),

    #[error("operation timeout: {0}")]
    Timeout(String),

    // === Generic ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::QueueTimeout(_) | Error::NoResponse { .. }
        )
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
