//! # Bulk Loader
//!
//! Full copy of one dataset into the sink, used before a new or drifted
//! dataset can be tailed.
//!
//! The source stream is pull-based, so holding the next poll until the
//! current insert is acknowledged pauses intake: at most one write per
//! dataset is ever in flight. A failed insert aborts the rest of the
//! dataset; rows already written stay (no rollback).

use crate::common::{CdcError, Definition, DocumentSource, OpDispatcher, Result, SyncStats};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Records between progress log lines.
const PROGRESS_INTERVAL: u64 = 10_000;

/// Outcome of one completed dataset import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub dataset: String,
    pub records: u64,
    pub elapsed: Duration,
}

/// Copies datasets from the source into the sink.
#[derive(Clone)]
pub struct BulkLoader {
    source: Arc<dyn DocumentSource>,
    dispatcher: OpDispatcher,
    stats: Arc<SyncStats>,
}

impl BulkLoader {
    pub fn new(source: Arc<dyn DocumentSource>, dispatcher: OpDispatcher, stats: Arc<SyncStats>) -> Self {
        Self {
            source,
            dispatcher,
            stats,
        }
    }

    /// Stream every current record of the dataset into the sink.
    ///
    /// Any failure is reported as [`CdcError::Import`] for this dataset.
    pub async fn load(&self, definition: &Definition) -> Result<LoadReport> {
        let started = Instant::now();
        info!(dataset = %definition.name, namespace = %definition.namespace, "Import records");

        let mut documents = self
            .source
            .scan(&definition.name)
            .await
            .map_err(|e| CdcError::import(definition.name.clone(), e.to_string()))?;

        let mut records = 0u64;
        while let Some(document) = documents.next().await {
            let document =
                document.map_err(|e| CdcError::import(definition.name.clone(), e.to_string()))?;

            self.dispatcher
                .insert(definition, &document)
                .await
                .map_err(|e| CdcError::import(definition.name.clone(), e.to_string()))?;

            records += 1;
            self.stats.record_imported();
            if records % PROGRESS_INTERVAL == 0 {
                debug!(dataset = %definition.name, records, "Import progress");
            }
        }

        let report = LoadReport {
            dataset: definition.name.clone(),
            records,
            elapsed: started.elapsed(),
        };
        info!(
            dataset = %report.dataset,
            records = report.records,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Import done"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for BulkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoader").finish_non_exhaustive()
    }
}
