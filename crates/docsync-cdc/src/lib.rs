//! # docsync-cdc - Document store to relational CDC
//!
//! Replicates a document store's append-only change log into a relational
//! database, keeping the sink schema reconciled with the configured datasets.
//!
//! ## Features
//!
//! - `mysql` - MySQL/MariaDB sink with checkpoint table
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────────────────────────┐   ┌──────────┐
//! │ change log   │──►│ Tailer ──► OpDispatcher ──► RelationalSink   │──►│  tables  │
//! │ (oplog)      │   │   ▲  checkpoint-then-apply                   │   └──────────┘
//! └──────────────┘   │   │ restart (new generation)                 │
//! ┌──────────────┐   │ BulkLoader (new / drifted datasets)          │
//! │ datasets     │──►│   one in-flight insert per dataset           │
//! └──────────────┘   └──────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//!
//! The checkpoint advances before each change is written, and an entry whose
//! timestamp equals the resume point is never redispatched. Writes are
//! idempotent at the identifier key, so the engine delivers every change
//! strictly after the stored checkpoint at least once. A rejected write
//! stops the engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsync_cdc::memory::{MemorySink, MemorySource};
//! use docsync_cdc::{MemoryCheckpointStore, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SyncConfig::from_file("docsync.yaml")?;
//! let engine = SyncEngine::new(
//!     config,
//!     Arc::new(MemorySource::new()),
//!     Arc::new(MemorySink::new()),
//!     Arc::new(MemoryCheckpointStore::new()),
//! );
//!
//! let shutdown = CancellationToken::new();
//! engine.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

// Common module - always available
pub mod common;

pub mod memory;
pub mod sql;

// MySQL sink - feature-gated
#[cfg(feature = "mysql")]
pub mod mysql;

pub use common::{
    // Error handling
    CdcError,
    ErrorCategory,
    Result,
    // Configuration
    InitialPosition,
    SyncConfig,
    TailConfig,
    // Engine
    SyncEngine,
    SyncStatsSnapshot,
    TailerState,
    // Collaborators
    DocumentSource,
    RelationalSink,
    // Checkpointing
    CheckpointBackend,
    FileCheckpointStore,
    MemoryCheckpointStore,
    Timestamp,
    // Change log
    ChangeEvent,
    LogEntry,
    OpKind,
};
