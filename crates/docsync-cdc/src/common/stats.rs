//! Engine counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the tail sessions, the bulk loads and the
/// orchestration loop.
#[derive(Debug, Default)]
pub struct SyncStats {
    entries_applied: AtomicU64,
    entries_skipped: AtomicU64,
    decode_errors: AtomicU64,
    records_imported: AtomicU64,
    imports_completed: AtomicU64,
    imports_failed: AtomicU64,
    restarts: AtomicU64,
    reconnects: AtomicU64,
    connect_failures: AtomicU64,
}

/// Point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatsSnapshot {
    pub entries_applied: u64,
    pub entries_skipped: u64,
    pub decode_errors: u64,
    pub records_imported: u64,
    pub imports_completed: u64,
    pub imports_failed: u64,
    pub restarts: u64,
    pub reconnects: u64,
    pub connect_failures: u64,
}

impl SyncStats {
    pub fn record_applied(&self) {
        self.entries_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.entries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_imported(&self) {
        self.records_imported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_import_completed(&self) {
        self.imports_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_import_failed(&self) {
        self.imports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            entries_applied: self.entries_applied.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            records_imported: self.records_imported.load(Ordering::Relaxed),
            imports_completed: self.imports_completed.load(Ordering::Relaxed),
            imports_failed: self.imports_failed.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = SyncStats::default();
        stats.record_applied();
        stats.record_applied();
        stats.record_restart();
        stats.record_connect_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.entries_applied, 2);
        assert_eq!(snap.restarts, 1);
        assert_eq!(snap.connect_failures, 1);
        assert_eq!(snap.reconnects, 0);
    }
}
