//! # Change Log Tailer
//!
//! One call to [`Tailer::run_cycle`] is one tail session: open a cursor over
//! the change log for a fixed generation of definitions, starting strictly
//! after the current checkpoint, and apply entries until the cursor closes,
//! fails, or the session's [`RestartSignal`] fires.
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Restarting | Closing | Failed
//! ```
//!
//! Per entry, in order: no-op markers and the entry sitting exactly on the
//! session's start checkpoint are skipped, the checkpoint advances to the
//! entry's timestamp, then the change is dispatched. An in-flight dispatch
//! always completes before a restart is observed.

use crate::common::{
    CdcError, ChangeEvent, CheckpointTracker, DefinitionSet, DocumentSource, LogEntry,
    OpDispatcher, Result, RestartSignal, SyncStats, TailFilter, TailOptions, Timestamp,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Observable tail session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TailerState {
    Idle,
    Connecting,
    Streaming,
    Restarting,
    Closing,
    Failed,
}

impl std::fmt::Display for TailerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Restarting => write!(f, "restarting"),
            Self::Closing => write!(f, "closing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How a tail session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The restart signal fired
    Restarted,
    /// The source closed the cursor
    Closed,
}

/// One generation of the tailed namespace set.
///
/// Generations are replaced, never mutated: a restart builds generation
/// `id + 1` from scratch.
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: u64,
    pub definitions: Arc<DefinitionSet>,
}

impl Generation {
    pub fn initial(definitions: DefinitionSet) -> Self {
        Self {
            id: 0,
            definitions: Arc::new(definitions),
        }
    }

    /// Successor generation over a new definition set.
    pub fn next(&self, definitions: DefinitionSet) -> Self {
        Self {
            id: self.id + 1,
            definitions: Arc::new(definitions),
        }
    }
}

/// Runs tail sessions. Sessions never overlap.
pub struct Tailer {
    source: Arc<dyn DocumentSource>,
    dispatcher: OpDispatcher,
    checkpoint: Arc<CheckpointTracker>,
    options: TailOptions,
    stats: Arc<SyncStats>,
    state: watch::Sender<TailerState>,
}

impl Tailer {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        dispatcher: OpDispatcher,
        checkpoint: Arc<CheckpointTracker>,
        options: TailOptions,
        stats: Arc<SyncStats>,
    ) -> Self {
        let (state, _) = watch::channel(TailerState::Idle);
        Self {
            source,
            dispatcher,
            checkpoint,
            options,
            stats,
            state,
        }
    }

    /// Watch session state transitions.
    pub fn subscribe(&self) -> watch::Receiver<TailerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> TailerState {
        *self.state.borrow()
    }

    fn set_state(&self, state: TailerState) {
        self.state.send_replace(state);
    }

    /// Run one tail session over `generation`.
    ///
    /// Returns an error when the cursor could not be opened
    /// ([`CdcError::Connect`]), when the stream fails, or when a write is
    /// rejected ([`CdcError::Write`], fatal).
    pub async fn run_cycle(
        &self,
        generation: &Generation,
        signal: &RestartSignal,
    ) -> Result<CycleOutcome> {
        let start = self.checkpoint.current();
        self.set_state(TailerState::Connecting);

        let definitions = generation.definitions.as_ref();
        if definitions.is_empty() {
            // nothing to filter on; hold the session open until restarted
            debug!(generation = generation.id, "No datasets to tail");
            self.set_state(TailerState::Streaming);
            signal.fired().await;
            self.set_state(TailerState::Restarting);
            return Ok(CycleOutcome::Restarted);
        }

        let filter = TailFilter::new(definitions.namespaces(), start);
        let opened = tokio::select! {
            biased;
            _ = signal.fired() => {
                self.set_state(TailerState::Restarting);
                return Ok(CycleOutcome::Restarted);
            }
            opened = self.source.tail(&filter, &self.options) => opened,
        };
        let mut entries = match opened {
            Ok(entries) => entries,
            Err(e) => {
                self.set_state(TailerState::Failed);
                return Err(match e {
                    CdcError::Connect(_) => e,
                    other => CdcError::connect(other.to_string()),
                });
            }
        };

        self.set_state(TailerState::Streaming);
        info!(
            generation = generation.id,
            namespaces = definitions.len(),
            from = %start,
            "Begin to watch"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = signal.fired() => {
                    info!(generation = generation.id, "Session stop requested");
                    self.set_state(TailerState::Restarting);
                    return Ok(CycleOutcome::Restarted);
                }
                next = entries.next() => next,
            };

            match next {
                None => {
                    info!(generation = generation.id, "Stream closed");
                    self.set_state(TailerState::Closing);
                    return Ok(CycleOutcome::Closed);
                }
                Some(Err(e)) => {
                    self.set_state(TailerState::Failed);
                    return Err(e);
                }
                Some(Ok(entry)) => {
                    if let Err(e) = self.process(entry, start, definitions).await {
                        self.set_state(TailerState::Failed);
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn process(&self, entry: LogEntry, start: Timestamp, definitions: &DefinitionSet) -> Result<()> {
        if entry.is_noop() || entry.ts == start {
            trace!(timestamp = %entry.ts, "Skipping entry");
            self.stats.record_skipped();
            return Ok(());
        }

        let event = match ChangeEvent::try_from(entry) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable change log entry");
                self.stats.record_decode_error();
                return Ok(());
            }
        };

        if !definitions.contains(&event.namespace) {
            self.stats.record_skipped();
            return Ok(());
        }

        self.checkpoint.advance(event.timestamp).await;

        let outcome = self.dispatcher.dispatch(definitions, &event).await?;
        if outcome.is_applied() {
            self.stats.record_applied();
        } else {
            self.stats.record_skipped();
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tailer")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
