//! Test harness for engine integration tests
//!
//! Wires a [`SyncEngine`] to in-memory collaborators and runs it on a
//! background task, with polling helpers for asserting on its progress.

#![allow(dead_code)]

use docsync_cdc::memory::{MemorySink, MemorySource};
use docsync_cdc::{
    CheckpointBackend, MemoryCheckpointStore, Result, SyncConfig, SyncEngine, TailerState,
};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("docsync_cdc=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Upper bound for any single wait in these tests
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration with a `users` dataset and whatever extra YAML is given.
pub fn config(extra: &str) -> SyncConfig {
    config_with_retry(20, extra)
}

/// Like [`config`], with the given cursor retry interval.
pub fn config_with_retry(retry_interval_ms: u64, extra: &str) -> SyncConfig {
    let yaml = format!(
        r#"
deployment: mirror
source_database: app
tail:
  retry_interval_ms: {}
datasets:
  users:
    _id: INT
    name: VARCHAR(255)
    age: INT
{}
"#,
        retry_interval_ms, extra
    );
    SyncConfig::from_yaml_str(&yaml).unwrap()
}

/// A running engine and its collaborators.
pub struct TestContext {
    pub source: Arc<MemorySource>,
    pub sink: Arc<MemorySink>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub engine: Arc<SyncEngine>,
    pub shutdown: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TestContext {
    /// Build an engine over fresh collaborators without starting it.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemorySource::new()),
            Arc::new(MemorySink::new()),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    pub fn with_parts(
        config: SyncConfig,
        source: Arc<MemorySource>,
        sink: Arc<MemorySink>,
        checkpoints: Arc<MemoryCheckpointStore>,
    ) -> Self {
        let backend: Arc<dyn CheckpointBackend> = checkpoints.clone();
        let engine = Arc::new(SyncEngine::new(config, source.clone(), sink.clone(), backend));
        Self {
            source,
            sink,
            checkpoints,
            engine,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }

    /// Run the engine on a background task.
    pub fn start(&mut self) {
        let engine = self.engine.clone();
        let shutdown = self.shutdown.clone();
        self.handle = Some(tokio::spawn(async move { engine.run(shutdown).await }));
    }

    /// Wait until the tail session streams with `cursors` cursors opened so far.
    pub async fn wait_streaming(&self, cursors: u64) {
        let source = self.source.clone();
        let engine = self.engine.clone();
        wait_until("tail session streaming", move || {
            source.tail_count() == cursors
                && *engine.subscribe_state().borrow() == TailerState::Streaming
        })
        .await;
    }

    /// Stop the engine and return its result.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for the engine to return on its own.
    pub async fn join(&mut self) -> Result<()> {
        let handle = self.handle.take().expect("engine not started");
        tokio::time::timeout(WAIT_TIMEOUT, handle)
            .await
            .expect("engine did not stop in time")
            .expect("engine task panicked")
    }
}

/// Poll `condition` until it holds, panicking after [`WAIT_TIMEOUT`].
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
