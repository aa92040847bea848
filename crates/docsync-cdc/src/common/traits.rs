//! Traits for the source and sink collaborators
//!
//! Database-agnostic trait definitions. The engine only talks to a document
//! store through [`DocumentSource`] and to a relational store through
//! [`RelationalSink`].

use crate::common::{ColumnValue, DatasetShape, Definition, LogEntry, Result, Timestamp};
use async_trait::async_trait;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use serde_json::Value;
use std::time::Duration;

/// Column name → value, in definition order.
pub type Row = IndexMap<String, ColumnValue>;

/// Documents of one dataset. Nothing is read ahead of the consumer's poll.
pub type DocumentStream = BoxStream<'static, Result<Value>>;

/// Change log entries in log order.
pub type LogStream = BoxStream<'static, Result<LogEntry>>;

/// Cursor filter over the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailFilter {
    /// Namespaces to include
    pub namespaces: Vec<String>,
    /// Exclusive lower bound
    pub after: Timestamp,
}

impl TailFilter {
    pub fn new(namespaces: Vec<String>, after: Timestamp) -> Self {
        Self { namespaces, after }
    }

    /// Whether an entry passes the filter.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.ts > self.after && self.namespaces.iter().any(|ns| *ns == entry.namespace)
    }
}

/// Cursor options for tailing the change log.
///
/// The retry count is a large explicit bound rather than infinity; with the
/// defaults a cursor waits a full day for new data before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailOptions {
    /// Keep the cursor open after the last entry
    pub tailable: bool,
    /// Disable the server-side idle cursor timeout
    pub no_cursor_timeout: bool,
    /// Use replay-from-point semantics for the timestamp filter
    pub oplog_replay: bool,
    /// Block waiting for new data instead of returning empty batches
    pub await_data: bool,
    /// Empty-batch retries before the cursor closes
    pub max_retries: u32,
    /// Delay between empty-batch retries
    pub retry_interval: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            tailable: true,
            no_cursor_timeout: true,
            oplog_replay: true,
            await_data: true,
            max_retries: 60 * 60 * 24,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Document store collaborator.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Enumerate the current documents of a dataset.
    async fn scan(&self, dataset: &str) -> Result<DocumentStream>;

    /// Open a cursor over the change log.
    ///
    /// An error means the cursor could not be opened. Errors yielded by the
    /// stream terminate it; a stream that ends means the source closed the
    /// cursor.
    async fn tail(&self, filter: &TailFilter, options: &TailOptions) -> Result<LogStream>;

    /// Newest change log position, if the log is not empty.
    async fn latest_timestamp(&self) -> Result<Option<Timestamp>>;
}

/// Relational store collaborator.
///
/// Writes are single-record and keyed by the definition's identifier
/// column. Inserts replace an existing record with the same identifier.
#[async_trait]
pub trait RelationalSink: Send + Sync {
    /// Physical table shapes whose names start with `prefix`, returned with
    /// the prefix stripped.
    async fn shapes(&self, prefix: &str) -> Result<Vec<DatasetShape>>;

    /// Drop and recreate the tables of the given definitions.
    async fn replace_tables(&self, definitions: &[Definition]) -> Result<()>;

    /// Insert or overwrite one record.
    async fn insert(&self, definition: &Definition, row: &Row) -> Result<()>;

    /// Update the given columns of one record.
    async fn update(&self, definition: &Definition, id: &ColumnValue, changes: &Row) -> Result<()>;

    /// Delete one record.
    async fn delete(&self, definition: &Definition, id: &ColumnValue) -> Result<()>;

    /// Check if the sink is reachable.
    async fn is_healthy(&self) -> bool;
}
