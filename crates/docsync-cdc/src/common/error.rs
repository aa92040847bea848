//! Error types for CDC operations
//!
//! Errors are classified so the orchestration loop can decide between
//! absorbing a failure (reconnect) and stopping the process (write rejected).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Document store errors (cursor, scan)
    Source,
    /// Relational store errors (writes, DDL)
    Sink,
    /// Schema reconciliation and table creation
    Schema,
    /// Checkpoint persistence
    Checkpoint,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Network errors (connection, timeout)
    Network,
    /// Serialization and decoding errors
    Serialization,
    /// Other/unknown errors
    Other,
}

/// Sink operation that was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// MySQL driver error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    MySql(String),

    /// Document store error while scanning or streaming
    #[error("Source error: {0}")]
    Source(String),

    /// The change log cursor could not be opened
    #[error("Connect error: {0}")]
    Connect(String),

    /// A single-record write was rejected by the sink
    #[error("Write error: {op} into {dataset} rejected: {message}")]
    Write {
        op: WriteOp,
        dataset: String,
        message: String,
    },

    /// Schema introspection or DDL error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Checkpoint read/write error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Bulk import of one dataset failed
    #[error("Import of {dataset} failed: {message}")]
    Import { dataset: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Change log entry could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink did not answer its liveness check
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CdcError {
    /// Create a new MySQL error
    #[cfg(feature = "mysql")]
    pub fn mysql(msg: impl Into<String>) -> Self {
        Self::MySql(msg.into())
    }

    /// Create a new source error
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a new connect error
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Create a write rejection error
    pub fn write(op: WriteOp, dataset: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Write {
            op,
            dataset: dataset.into(),
            message: msg.into(),
        }
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create an import error for one dataset
    pub fn import(dataset: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Import {
            dataset: dataset.into(),
            message: msg.into(),
        }
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a sink unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors that a reconnect may cure.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::Unavailable(_) => true,
            Self::Source(_) => true,

            #[cfg(feature = "mysql")]
            Self::MySql(msg) => {
                msg.contains("Lost connection")
                    || msg.contains("Deadlock")
                    || msg.contains("Lock wait timeout")
            }

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::Write { .. }
            | Self::Schema(_)
            | Self::Checkpoint(_)
            | Self::Import { .. }
            | Self::Config(_)
            | Self::Decode(_)
            | Self::Json(_)
            | Self::Other(_) => false,
        }
    }

    /// Check if this error must stop the whole process.
    ///
    /// A rejected write means source and sink are out of sync; skipping it
    /// silently would desynchronize them, so the operator has to intervene.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Write { .. })
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(_) => ErrorCategory::Sink,
            Self::Source(_) => ErrorCategory::Source,
            Self::Connect(_) => ErrorCategory::Network,
            Self::Write { .. } => ErrorCategory::Sink,
            Self::Schema(_) => ErrorCategory::Schema,
            Self::Checkpoint(_) => ErrorCategory::Checkpoint,
            Self::Import { .. } => ErrorCategory::Schema,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Decode(_) => ErrorCategory::Serialization,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Network,
            Self::Unavailable(_) => ErrorCategory::Sink,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(_) => "mysql_error",
            Self::Source(_) => "source_error",
            Self::Connect(_) => "connect_error",
            Self::Write { .. } => "write_rejected",
            Self::Schema(_) => "schema_error",
            Self::Checkpoint(_) => "checkpoint_error",
            Self::Import { .. } => "import_failed",
            Self::Config(_) => "config_error",
            Self::Decode(_) => "decode_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::Unavailable(_) => "sink_unavailable",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;
