//! # Checkpointing
//!
//! A deployment persists a single change log position: the newest entry the
//! tailer has advanced past. On restart the tailer resumes strictly after it.
//!
//! ## Ordering
//!
//! The tracker is advanced *before* the corresponding change is written to
//! the sink. A crash between the two can lose that one change; an entry
//! whose timestamp equals the resume point is never redispatched. Sink
//! writes are idempotent at the identifier key (replace-or-overwrite
//! inserts, keyed updates and deletes), so replays after a checkpoint save
//! failure are harmless. The net guarantee is at-least-once for everything
//! strictly after the stored checkpoint.
//!
//! ## Backends
//!
//! - [`MemoryCheckpointStore`] for tests and ephemeral runs
//! - [`FileCheckpointStore`] one JSON file per deployment, atomic rename
//! - the MySQL sink's checkpoint table (feature `mysql`)

use crate::common::{CdcError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Trait for checkpoint storage backends.
#[async_trait::async_trait]
pub trait CheckpointBackend: Send + Sync {
    /// Stored position for a deployment, if any.
    async fn load(&self, deployment: &str) -> Result<Option<Timestamp>>;

    /// Persist the position for a deployment.
    async fn save(&self, deployment: &str, ts: Timestamp) -> Result<()>;
}

/// Shared checkpoint backend.
pub type SharedCheckpointBackend = Arc<dyn CheckpointBackend>;

/// In-memory checkpoint store (for testing or when persistence isn't needed).
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Timestamp>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a position, as if left by an earlier run.
    pub fn with_checkpoint(deployment: &str, ts: Timestamp) -> Self {
        let mut checkpoints = HashMap::new();
        checkpoints.insert(deployment.to_string(), ts);
        Self {
            checkpoints: RwLock::new(checkpoints),
        }
    }
}

#[async_trait::async_trait]
impl CheckpointBackend for MemoryCheckpointStore {
    async fn load(&self, deployment: &str) -> Result<Option<Timestamp>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(deployment).copied())
    }

    async fn save(&self, deployment: &str, ts: Timestamp) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(deployment.to_string(), ts);
        Ok(())
    }
}

/// On-disk checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct CheckpointRecord {
    deployment: String,
    timestamp: Timestamp,
    /// Wall clock time of the save (RFC 3339)
    updated_at: String,
}

/// Persistent checkpoint storage.
///
/// Stores one JSON file per deployment, written atomically through a
/// temporary file and a rename.
#[derive(Debug)]
pub struct FileCheckpointStore {
    base_dir: PathBuf,
    fsync: bool,
}

impl FileCheckpointStore {
    /// Create a new checkpoint store, creating the directory if needed.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(base_dir, true).await
    }

    /// Create checkpoint store with custom options.
    pub async fn with_options(base_dir: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir, fsync })
    }

    fn file_path(&self, deployment: &str) -> Result<PathBuf> {
        if deployment.is_empty() || deployment.contains('/') || deployment.contains('\\') {
            return Err(CdcError::checkpoint(format!(
                "invalid deployment name '{}'",
                deployment
            )));
        }
        Ok(self.base_dir.join(format!("{}.json", deployment)))
    }
}

#[async_trait::async_trait]
impl CheckpointBackend for FileCheckpointStore {
    async fn load(&self, deployment: &str) -> Result<Option<Timestamp>> {
        let path = self.file_path(deployment)?;
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: CheckpointRecord = serde_json::from_str(&contents)
            .map_err(|e| CdcError::checkpoint(format!("{}: {}", path.display(), e)))?;
        Ok(Some(record.timestamp))
    }

    async fn save(&self, deployment: &str, ts: Timestamp) -> Result<()> {
        let path = self.file_path(deployment)?;
        let temp_path = path.with_extension("tmp");

        let record = CheckpointRecord {
            deployment: deployment.to_string(),
            timestamp: ts,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        if self.fsync {
            file.sync_all().await?;
        }

        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}

/// In-memory monotonic checkpoint backed by a persistent store.
///
/// Only the orchestration loop's active tail session advances it, so
/// advances are sequential; reads may come from anywhere.
pub struct CheckpointTracker {
    deployment: String,
    backend: SharedCheckpointBackend,
    current: AtomicU64,
}

impl CheckpointTracker {
    pub fn new(deployment: impl Into<String>, backend: SharedCheckpointBackend) -> Self {
        Self {
            deployment: deployment.into(),
            backend,
            current: AtomicU64::new(0),
        }
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Current in-memory position.
    pub fn current(&self) -> Timestamp {
        Timestamp::from_u64(self.current.load(Ordering::Acquire))
    }

    /// Load the stored position into memory.
    ///
    /// Returns the stored value, or `None` when the deployment has never
    /// saved one (the in-memory value is left unchanged).
    pub async fn restore(&self) -> Result<Option<Timestamp>> {
        let stored = self.backend.load(&self.deployment).await?;
        if let Some(ts) = stored {
            self.current.fetch_max(ts.as_u64(), Ordering::AcqRel);
            info!(deployment = %self.deployment, timestamp = %ts, "Restored checkpoint");
        }
        Ok(stored)
    }

    /// Set the in-memory position without persisting it.
    ///
    /// Used to start from the newest log position when nothing is stored;
    /// the first advance persists it.
    pub fn seed(&self, ts: Timestamp) {
        self.current.fetch_max(ts.as_u64(), Ordering::AcqRel);
    }

    /// Advance to `ts` if it is newer and persist it.
    ///
    /// Returns whether the position moved. Persistence failures are logged
    /// and swallowed; the in-memory value has already advanced.
    pub async fn advance(&self, ts: Timestamp) -> bool {
        let previous = self.current.fetch_max(ts.as_u64(), Ordering::AcqRel);
        if ts.as_u64() <= previous {
            return false;
        }

        match self.backend.save(&self.deployment, ts).await {
            Ok(()) => debug!(deployment = %self.deployment, timestamp = %ts, "Checkpoint saved"),
            Err(e) => warn!(
                deployment = %self.deployment,
                timestamp = %ts,
                error = %e,
                "Failed to persist checkpoint"
            ),
        }
        true
    }
}

impl std::fmt::Debug for CheckpointTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointTracker")
            .field("deployment", &self.deployment)
            .field("current", &self.current())
            .finish()
    }
}
