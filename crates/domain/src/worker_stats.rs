//! Per-cycle worker observations (spec.md §3, §4.6 "Per-worker stats").

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which long-running worker a [`WorkerStats`] row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// File Watcher.
    FileWatcher,
    /// Indexing Worker.
    Indexer,
    /// Chunking/Vectorization Worker.
    Vectorizer,
    /// Worker Orchestrator itself (start/stop events, spec.md §4.6).
    Orchestrator,
}

impl WorkerKind {
    /// Returns the canonical string identifier, matching `workers.<kind>`
    /// configuration keys (spec.md §6) where applicable.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileWatcher => "file_watcher",
            Self::Indexer => "indexer",
            Self::Vectorizer => "vectorizer",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Observations recorded for one worker cycle (spec.md §3 "WorkerStats").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Which worker produced this row.
    pub kind: WorkerKind,
    /// Monotonic cycle identifier, scoped to `kind`.
    pub cycle_id: u64,
    /// Items scanned/examined this cycle.
    pub scanned: u64,
    /// Items newly added.
    pub added: u64,
    /// Items changed.
    pub changed: u64,
    /// Items deleted.
    pub deleted: u64,
    /// Errors encountered (all recoverable; see spec.md §7 propagation
    /// policy — a fatal error tears the worker down before this is
    /// recorded).
    pub errors: u64,
    /// Wall-clock duration of the cycle, in seconds.
    pub duration_seconds: f64,
    /// Cycle start timestamp, Unix seconds.
    pub started_at: f64,
}

impl WorkerStats {
    /// Construct an empty stats row for the start of a cycle.
    #[must_use]
    pub const fn start(kind: WorkerKind, cycle_id: u64, started_at: f64) -> Self {
        Self {
            kind,
            cycle_id,
            scanned: 0,
            added: 0,
            changed: 0,
            deleted: 0,
            errors: 0,
            duration_seconds: 0.0,
            started_at,
        }
    }

    /// Record cycle completion, setting the elapsed duration.
    pub fn finish(&mut self, finished_at: f64) {
        self.duration_seconds = (finished_at - self.started_at).max(0.0);
    }

    /// True when the cycle touched at least one file (spec.md §4.4 step 4:
    /// determines the idle-sleep duration).
    #[must_use]
    pub const fn touched_any(&self) -> bool {
        self.added > 0 || self.changed > 0 || self.deleted > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_computes_non_negative_duration() {
        let mut stats = WorkerStats::start(WorkerKind::Indexer, 1, 1_000.0);
        stats.finish(1_002.5);
        assert_eq!(stats.duration_seconds, 2.5);
    }

    #[test]
    fn finish_clamps_duration_to_zero_on_clock_skew() {
        let mut stats = WorkerStats::start(WorkerKind::Indexer, 1, 1_000.0);
        stats.finish(999.0);
        assert_eq!(stats.duration_seconds, 0.0);
    }

    #[test]
    fn touched_any_reflects_delta_counters() {
        let mut stats = WorkerStats::start(WorkerKind::FileWatcher, 1, 0.0);
        assert!(!stats.touched_any());
        stats.changed = 1;
        assert!(stats.touched_any());
    }
}
