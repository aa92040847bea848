//! # Common CDC Types and Traits
//!
//! Database-agnostic building blocks of the sync engine:
//!
//! - [`SyncConfig`] - YAML configuration with environment expansion
//! - [`DefinitionRegistry`] / [`Definition`] - dataset to table mappings
//! - [`reconcile`] - schema reconciliation (new / drifted / unchanged)
//! - [`CheckpointTracker`] - monotonic change log position with persistence
//! - [`Tailer`] - checkpointed change log tail sessions
//! - [`BulkLoader`] - backpressured full copy of one dataset
//! - [`OpDispatcher`] - change event to sink write routing
//! - [`SyncEngine`] - the orchestration loop
//! - [`DocumentSource`] / [`RelationalSink`] - collaborator traits
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  scan / tail   ┌──────────────┐  insert / update / delete  ┌───────────────┐
//! │DocumentSource│ ─────────────► │  SyncEngine  │ ─────────────────────────► │ RelationalSink│
//! └──────────────┘                │ Tailer       │                            └───────────────┘
//!                                 │ BulkLoader   │
//!                                 │ OpDispatcher │ ──► CheckpointTracker ──► CheckpointBackend
//!                                 └──────────────┘
//! ```

mod checkpoint;
mod config;
mod definition;
mod dispatch;
mod engine;
mod error;
mod event;
mod loader;
mod naming;
mod reconcile;
mod signal;
mod stats;
mod tailer;
mod traits;
mod value;

pub use checkpoint::*;
pub use config::*;
pub use definition::*;
pub use dispatch::*;
pub use engine::*;
pub use error::*;
pub use event::*;
pub use loader::*;
pub use naming::*;
pub use reconcile::*;
pub use signal::*;
pub use stats::*;
pub use tailer::*;
pub use traits::*;
pub use value::*;
