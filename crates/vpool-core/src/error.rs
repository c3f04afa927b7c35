//! Error types for vpool

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for pool and driver operations
#[derive(Error, Debug)]
pub enum VpoolError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Too many connections: {0}")]
    TooManyConnections(String),

    #[error(
        "Timed out after {elapsed:?} waiting for a validated connection (caller: {caller}){}",
        last_error_suffix(.cause)
    )]
    AcquireTimeout {
        elapsed: Duration,
        caller: String,
        cause: Option<String>,
    },

    #[error("Pool error: {message}")]
    Pool {
        message: String,
        #[source]
        source: Box<VpoolError>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Pool is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VpoolError {
    /// Wrap an underlying error as a generic pool error, keeping it as the source.
    pub fn pool(message: impl Into<String>, source: VpoolError) -> Self {
        VpoolError::Pool {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Classify the error.
    ///
    /// Pool errors report the kind of the error they wrap.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VpoolError::Connection(_) => ErrorKind::Connection,
            VpoolError::Query(_) => ErrorKind::Query,
            VpoolError::Configuration(_) => ErrorKind::Configuration,
            VpoolError::NotSupported(_) => ErrorKind::NotSupported,
            VpoolError::TooManyConnections(_) => ErrorKind::TooManyConnections,
            VpoolError::AcquireTimeout { .. } | VpoolError::Timeout(_) => ErrorKind::Timeout,
            VpoolError::Pool { source, .. } => source.kind(),
            VpoolError::Cancelled => ErrorKind::Cancelled,
            VpoolError::Closed => ErrorKind::Closed,
            VpoolError::Io(_) => ErrorKind::Io,
            VpoolError::Serialization(_) => ErrorKind::Serialization,
            VpoolError::Other(_) => ErrorKind::Other,
        }
    }
}

fn last_error_suffix(cause: &Option<String>) -> String {
    match cause {
        Some(cause) => format!(", last error: {cause}"),
        None => String::new(),
    }
}

/// Copyable classification of [`VpoolError`]
///
/// Used by the steady connection to decide which failures trigger a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Query,
    Configuration,
    NotSupported,
    TooManyConnections,
    Timeout,
    Cancelled,
    Closed,
    Io,
    Serialization,
    Other,
}

/// Result type alias for vpool operations
pub type Result<T> = std::result::Result<T, VpoolError>;
