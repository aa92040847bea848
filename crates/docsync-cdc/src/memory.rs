//! In-memory source and sink collaborators.
//!
//! [`MemorySource`] holds datasets and an append-only change log with a live
//! feed, so cursors opened on it behave like tailable cursors: they replay
//! the matching backlog and then wait for new entries. [`MemorySink`] keeps
//! tables in memory and journals every successful write.
//!
//! Both carry fault injection hooks for exercising the engine's reconnect
//! and failure paths.

use crate::common::{
    CdcError, ColumnValue, DatasetShape, Definition, DocumentSource, DocumentStream,
    FieldDescriptor, LogEntry, LogStream, RelationalSink, Result, Row, TailFilter, TailOptions,
    Timestamp,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum FeedItem {
    Entry { entry: LogEntry, unfiltered: bool },
    Close,
    Error { message: String, transient: bool },
}

#[derive(Debug, Default)]
struct SourceState {
    documents: HashMap<String, Vec<Value>>,
    log: Vec<(LogEntry, bool)>,
    cursors: Vec<Vec<String>>,
}

/// In-memory document store.
#[derive(Debug)]
pub struct MemorySource {
    state: Mutex<SourceState>,
    feed: broadcast::Sender<FeedItem>,
    fail_next_tail: AtomicBool,
    finite_cursors: AtomicBool,
    tails: AtomicU64,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Mutex::new(SourceState::default()),
            feed,
            fail_next_tail: AtomicBool::new(false),
            finite_cursors: AtomicBool::new(false),
            tails: AtomicU64::new(0),
        }
    }

    /// Replace the current documents of a dataset. Nothing is logged.
    pub fn put_documents(&self, dataset: &str, documents: Vec<Value>) {
        self.state
            .lock()
            .documents
            .insert(dataset.to_string(), documents);
    }

    pub fn documents(&self, dataset: &str) -> Vec<Value> {
        self.state
            .lock()
            .documents
            .get(dataset)
            .cloned()
            .unwrap_or_default()
    }

    /// Append an entry to the change log and publish it to open cursors.
    pub fn append(&self, entry: LogEntry) {
        self.push(entry, false);
    }

    /// Append an entry that every cursor delivers regardless of its filter.
    pub fn append_unfiltered(&self, entry: LogEntry) {
        self.push(entry, true);
    }

    fn push(&self, entry: LogEntry, unfiltered: bool) {
        self.state.lock().log.push((entry.clone(), unfiltered));
        // no open cursor is fine
        let _ = self.feed.send(FeedItem::Entry { entry, unfiltered });
    }

    /// End every open cursor normally.
    pub fn close_cursors(&self) {
        let _ = self.feed.send(FeedItem::Close);
    }

    /// Fail every open cursor with a transient stream error.
    pub fn break_cursors(&self, message: &str) {
        let _ = self.feed.send(FeedItem::Error {
            message: message.to_string(),
            transient: true,
        });
    }

    /// Fail every open cursor with an entry the source cannot decode.
    pub fn corrupt_cursors(&self, message: &str) {
        let _ = self.feed.send(FeedItem::Error {
            message: message.to_string(),
            transient: false,
        });
    }

    /// Make cursors end after replaying their backlog instead of waiting
    /// for new entries.
    pub fn close_cursors_after_backlog(&self) {
        self.finite_cursors.store(true, Ordering::SeqCst);
    }

    /// Make the next `tail` call fail as if the cursor could not be opened.
    pub fn fail_next_tail(&self) {
        self.fail_next_tail.store(true, Ordering::SeqCst);
    }

    /// Number of cursors opened so far.
    pub fn tail_count(&self) -> u64 {
        self.tails.load(Ordering::SeqCst)
    }

    /// Namespace filter of every cursor opened so far, oldest first.
    pub fn cursor_namespaces(&self) -> Vec<Vec<String>> {
        self.state.lock().cursors.clone()
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn scan(&self, dataset: &str) -> Result<DocumentStream> {
        let documents = self.documents(dataset);
        Ok(stream::iter(documents.into_iter().map(Ok)).boxed())
    }

    async fn tail(&self, filter: &TailFilter, _options: &TailOptions) -> Result<LogStream> {
        if self.fail_next_tail.swap(false, Ordering::SeqCst) {
            return Err(CdcError::connect("injected cursor open failure"));
        }

        // subscribe before reading the backlog so nothing falls in between
        let rx = self.feed.subscribe();
        let backlog: Vec<LogEntry> = {
            let mut state = self.state.lock();
            state.cursors.push(filter.namespaces.clone());
            state
                .log
                .iter()
                .filter(|(entry, unfiltered)| *unfiltered || filter.matches(entry))
                .map(|(entry, _)| entry.clone())
                .collect()
        };
        self.tails.fetch_add(1, Ordering::SeqCst);
        let last = backlog.last().map(|e| e.ts).unwrap_or(filter.after);
        debug!(backlog = backlog.len(), after = %filter.after, "Opened memory cursor");

        let replay = stream::iter(backlog.into_iter().map(Ok));
        if self.finite_cursors.load(Ordering::SeqCst) {
            return Ok(replay.boxed());
        }

        let live = stream::unfold(
            Some((rx, filter.clone(), last)),
            |state| async move {
                let (mut rx, filter, last) = state?;
                loop {
                    match rx.recv().await {
                        Ok(FeedItem::Entry { entry, unfiltered }) => {
                            if entry.ts > last && (unfiltered || filter.matches(&entry)) {
                                let ts = entry.ts;
                                return Some((Ok(entry), Some((rx, filter, ts))));
                            }
                        }
                        Ok(FeedItem::Close) | Err(broadcast::error::RecvError::Closed) => {
                            return None
                        }
                        Ok(FeedItem::Error { message, transient }) => {
                            let err = if transient {
                                CdcError::source(message)
                            } else {
                                CdcError::decode(message)
                            };
                            return Some((Err(err), None));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            return Some((
                                Err(CdcError::source(format!("cursor lagged by {} entries", skipped))),
                                None,
                            ));
                        }
                    }
                }
            },
        );

        Ok(replay.chain(live).boxed())
    }

    async fn latest_timestamp(&self) -> Result<Option<Timestamp>> {
        Ok(self.state.lock().log.iter().map(|(e, _)| e.ts).max())
    }
}

/// Successful write recorded by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    ReplaceTables { tables: Vec<String> },
    Insert { table: String, id: ColumnValue },
    Update { table: String, id: ColumnValue, columns: Vec<String> },
    Delete { table: String, id: ColumnValue },
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<FieldDescriptor>,
    rows: IndexMap<String, Row>,
}

/// Row key that keeps identifiers of different types apart (`1` vs `"1"`).
fn row_key(id: &ColumnValue) -> String {
    format!("{:?}", id)
}

#[derive(Debug, Default)]
struct SinkState {
    tables: IndexMap<String, Table>,
    calls: Vec<SinkCall>,
    failing: HashSet<String>,
}

/// In-memory relational store.
///
/// Writes to a table that does not exist create it, so callers that are not
/// about DDL can skip it.
#[derive(Debug)]
pub struct MemorySink {
    state: Mutex<SinkState>,
    healthy: AtomicBool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState::default()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Create a table with the given columns, as if left by an earlier run.
    pub fn create_table(&self, table: &str, columns: Vec<FieldDescriptor>) {
        self.state.lock().tables.insert(
            table.to_string(),
            Table {
                columns,
                rows: IndexMap::new(),
            },
        );
    }

    /// Reject every subsequent write to `table`.
    pub fn fail_writes_to(&self, table: &str) {
        self.state.lock().failing.insert(table.to_string());
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Journal of successful calls, oldest first.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.state.lock().calls.clone()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Row stored under an identifier.
    pub fn row(&self, table: &str, id: &ColumnValue) -> Option<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|t| t.rows.get(&row_key(id)).cloned())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.lock().tables.keys().cloned().collect()
    }

    fn check_writable(state: &SinkState, definition: &Definition) -> Result<()> {
        if state.failing.contains(&definition.target_name) {
            return Err(CdcError::other(format!(
                "injected write failure on {}",
                definition.target_name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalSink for MemorySink {
    async fn shapes(&self, prefix: &str) -> Result<Vec<DatasetShape>> {
        let state = self.state.lock();
        Ok(state
            .tables
            .iter()
            .filter_map(|(name, table)| {
                name.strip_prefix(prefix)
                    .map(|stripped| DatasetShape::new(stripped, table.columns.clone()))
            })
            .collect())
    }

    async fn replace_tables(&self, definitions: &[Definition]) -> Result<()> {
        let mut state = self.state.lock();
        for definition in definitions {
            let columns = definition
                .fields
                .iter()
                .map(|f| FieldDescriptor::new(f.target_name.clone(), f.column_type.clone()))
                .collect();
            state.tables.insert(
                definition.target_name.clone(),
                Table {
                    columns,
                    rows: IndexMap::new(),
                },
            );
        }
        state.calls.push(SinkCall::ReplaceTables {
            tables: definitions.iter().map(|d| d.target_name.clone()).collect(),
        });
        Ok(())
    }

    async fn insert(&self, definition: &Definition, row: &Row) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, definition)?;

        let id = row
            .get(&definition.id_target_field)
            .cloned()
            .unwrap_or(ColumnValue::Null);
        state
            .tables
            .entry(definition.target_name.clone())
            .or_default()
            .rows
            .insert(row_key(&id), row.clone());
        state.calls.push(SinkCall::Insert {
            table: definition.target_name.clone(),
            id,
        });
        Ok(())
    }

    async fn update(&self, definition: &Definition, id: &ColumnValue, changes: &Row) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, definition)?;

        if let Some(row) = state
            .tables
            .get_mut(&definition.target_name)
            .and_then(|t| t.rows.get_mut(&row_key(id)))
        {
            for (column, value) in changes {
                row.insert(column.clone(), value.clone());
            }
        }
        state.calls.push(SinkCall::Update {
            table: definition.target_name.clone(),
            id: id.clone(),
            columns: changes.keys().cloned().collect(),
        });
        Ok(())
    }

    async fn delete(&self, definition: &Definition, id: &ColumnValue) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, definition)?;

        if let Some(table) = state.tables.get_mut(&definition.target_name) {
            table.rows.shift_remove(&row_key(id));
        }
        state.calls.push(SinkCall::Delete {
            table: definition.target_name.clone(),
            id: id.clone(),
        });
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
