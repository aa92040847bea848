//! # Sync Engine
//!
//! The orchestration loop. At startup it reconciles the sink schema against
//! configuration, starts tailing the datasets whose tables are already
//! correct, and concurrently rebuilds and bulk-loads the new or drifted
//! ones. When the whole import batch is done, one restart folds the
//! imported datasets into the tailed set.
//!
//! ```text
//! reconcile ──► generation 0 (unchanged datasets) ──► tail session ─┐
//!     │                                                  ▲          │
//!     └─► wait for Streaming ─► rebuild + load (per dataset, concurrent)
//!                                    │                   │
//!                                    └─ RestartRequest ──► generation 1
//! ```
//!
//! The loop owns the tailed set and the generation counter. Sessions never
//! overlap: a restart fires the session's signal and waits for it to drain
//! before the next one starts, resuming from the current checkpoint.

use crate::common::{
    reconcile, restart_channel, BulkLoader, CdcError, CheckpointTracker, CycleOutcome,
    Definition, DefinitionSet, DocumentSource, Generation, InitialPosition, OpDispatcher,
    RelationalSink, RestartRequest, RestartSender, RestartSignal, Result,
    SharedCheckpointBackend, SyncConfig, SyncStats, SyncStatsSnapshot, Tailer, TailerState,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// CDC engine replicating configured datasets from a document source into a
/// relational sink.
pub struct SyncEngine {
    config: SyncConfig,
    source: Arc<dyn DocumentSource>,
    sink: Arc<dyn RelationalSink>,
    checkpoint: Arc<CheckpointTracker>,
    tailer: Tailer,
    loader: BulkLoader,
    stats: Arc<SyncStats>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn DocumentSource>,
        sink: Arc<dyn RelationalSink>,
        checkpoints: SharedCheckpointBackend,
    ) -> Self {
        let stats = Arc::new(SyncStats::default());
        let checkpoint = Arc::new(CheckpointTracker::new(config.deployment.clone(), checkpoints));
        let dispatcher = OpDispatcher::new(sink.clone());
        let tailer = Tailer::new(
            source.clone(),
            dispatcher.clone(),
            checkpoint.clone(),
            config.tail.options(),
            stats.clone(),
        );
        let loader = BulkLoader::new(source.clone(), dispatcher, stats.clone());

        Self {
            config,
            source,
            sink,
            checkpoint,
            tailer,
            loader,
            stats,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Counters since the engine was created.
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current in-memory checkpoint.
    pub fn checkpoint(&self) -> &Arc<CheckpointTracker> {
        &self.checkpoint
    }

    /// Watch tail session state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TailerState> {
        self.tailer.subscribe()
    }

    /// Run until `shutdown` fires (returns `Ok`) or a fatal error occurs.
    ///
    /// Fatal errors are sink write rejections and startup failures
    /// (sink liveness, schema introspection, checkpoint load).
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if !self.sink.is_healthy().await {
            let err = CdcError::unavailable("liveness check failed at startup");
            error!(error = %err, category = ?err.category(), "Cannot start sync engine");
            return Err(err);
        }

        let registry = self.config.registry();
        let desired = registry.definitions(&self.config.datasets);
        let shapes: Vec<_> = desired.iter().map(Definition::desired_shape).collect();

        let reconciliation = reconcile(self.sink.as_ref(), registry.prefix(), &shapes).await?;
        let mut tailed: Vec<String> = reconciliation
            .tail_ready()
            .into_iter()
            .map(str::to_string)
            .collect();
        let to_import: Vec<Definition> =
            registry.definitions_for(&self.config.datasets, reconciliation.needs_import());

        self.restore_checkpoint().await?;

        let mut generation = Generation::initial(DefinitionSet::new(
            registry.definitions_for(&self.config.datasets, tailed.iter().map(String::as_str)),
        ));

        let (restart_tx, mut restart_rx) = restart_channel();
        let importer = if to_import.is_empty() {
            None
        } else {
            info!(datasets = to_import.len(), "Importing new or changed datasets");
            Some(self.spawn_import(to_import, restart_tx))
        };

        let result = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }

            let signal = RestartSignal::child_of(&shutdown);
            let (outcome, request) = {
                let cycle = self.tailer.run_cycle(&generation, &signal);
                tokio::pin!(cycle);

                tokio::select! {
                    outcome = &mut cycle => (outcome, None),
                    Some(request) = restart_rx.recv() => {
                        info!(
                            generation = generation.id,
                            datasets = ?request.datasets,
                            "Restart requested"
                        );
                        signal.fire();
                        (cycle.await, Some(request))
                    }
                }
            };

            if let Some(RestartRequest { datasets }) = request {
                for dataset in datasets {
                    if !tailed.contains(&dataset) {
                        tailed.push(dataset);
                    }
                }
                generation = generation.next(DefinitionSet::new(registry.definitions_for(
                    &self.config.datasets,
                    tailed.iter().map(String::as_str),
                )));
                self.stats.record_restart();
                info!(
                    generation = generation.id,
                    datasets = generation.definitions.len(),
                    from = %self.checkpoint.current(),
                    "Tailing enlarged dataset set"
                );
            }

            match outcome {
                Ok(CycleOutcome::Restarted) => {}
                Ok(CycleOutcome::Closed) => {
                    self.stats.record_reconnect();
                    info!(generation = generation.id, "Reconnecting");
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, code = e.error_code(), "Fatal error, stopping");
                    break Err(e);
                }
                Err(e) => {
                    // a dropped stream is reopened at once; a refused cursor
                    // or a non-transient failure waits one retry interval
                    let connect_failed = matches!(e, CdcError::Connect(_));
                    let immediate = e.is_retriable() && !connect_failed;
                    if connect_failed {
                        self.stats.record_connect_failure();
                    } else {
                        self.stats.record_reconnect();
                    }

                    if immediate {
                        warn!(
                            error = %e,
                            code = e.error_code(),
                            category = ?e.category(),
                            "Tail cycle failed, reconnecting"
                        );
                    } else {
                        let delay = self.config.tail.retry_interval();
                        warn!(
                            error = %e,
                            code = e.error_code(),
                            category = ?e.category(),
                            delay_ms = delay.as_millis() as u64,
                            "Tail cycle failed, retrying after delay"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.cancelled() => {}
                        }
                    }
                }
            }
        };

        if let Some(importer) = importer {
            importer.abort();
        }
        if result.is_ok() {
            info!(checkpoint = %self.checkpoint.current(), "Sync engine stopped");
        }
        result
    }

    async fn restore_checkpoint(&self) -> Result<()> {
        if self.checkpoint.restore().await?.is_some() {
            return Ok(());
        }

        match self.config.initial_position {
            InitialPosition::Earliest => {
                info!(deployment = %self.config.deployment, "No checkpoint, tailing from the beginning");
            }
            InitialPosition::Latest => {
                if let Some(latest) = self.source.latest_timestamp().await? {
                    self.checkpoint.seed(latest);
                    info!(
                        deployment = %self.config.deployment,
                        timestamp = %latest,
                        "No checkpoint, tailing from the newest entry"
                    );
                }
            }
        }
        Ok(())
    }

    /// Import coordinator: waits for the first tail session to stream, then
    /// rebuilds and loads every dataset concurrently, and finally asks for
    /// one restart covering the datasets that made it.
    fn spawn_import(&self, definitions: Vec<Definition>, restart_tx: RestartSender) -> JoinHandle<()> {
        let sink = self.sink.clone();
        let loader = self.loader.clone();
        let stats = self.stats.clone();
        let mut state = self.tailer.subscribe();

        tokio::spawn(async move {
            if state
                .wait_for(|s| *s == TailerState::Streaming)
                .await
                .is_err()
            {
                return;
            }

            let mut imports = JoinSet::new();
            for definition in definitions {
                let sink = sink.clone();
                let loader = loader.clone();
                imports.spawn(async move {
                    sink.replace_tables(std::slice::from_ref(&definition))
                        .await
                        .map_err(|e| CdcError::import(definition.name.clone(), e.to_string()))?;
                    loader.load(&definition).await
                });
            }

            let mut imported = Vec::new();
            while let Some(joined) = imports.join_next().await {
                match joined {
                    Ok(Ok(report)) => {
                        stats.record_import_completed();
                        imported.push(report.dataset);
                    }
                    Ok(Err(e)) => {
                        stats.record_import_failed();
                        error!(error = %e, "Import failed, dataset will not be tailed");
                    }
                    Err(e) => {
                        stats.record_import_failed();
                        error!(error = %e, "Import task aborted");
                    }
                }
            }

            info!(imported = imported.len(), "Done importing all datasets");
            if imported.is_empty() {
                return;
            }
            if restart_tx
                .send(RestartRequest { datasets: imported })
                .await
                .is_err()
            {
                warn!("Engine stopped before the restart could be requested");
            }
        })
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("deployment", &self.config.deployment)
            .field("checkpoint", &self.checkpoint.current())
            .field("state", &self.tailer.state())
            .finish_non_exhaustive()
    }
}
