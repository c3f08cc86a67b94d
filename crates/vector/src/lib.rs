//! # pyindex-vector
//!
//! Vector indexing kernel: an append-only, monotonic-id, flat vector store
//! with brute-force squared-L2 nearest-neighbor search. This crate depends
//! only on `pyindex-shared`.
//!
//! The index never reassigns or recycles an id once it has been handed out
//! by [`VectorIndex::add`]; the next id is always one greater than the
//! maximum id currently stored, recomputed from the loaded snapshot (or a
//! caller-supplied storage-side watermark) so that a crash between
//! `VectorIndex::add` and the caller persisting the id cannot cause a
//! collision.

use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const VECTOR_SNAPSHOT_VERSION: u32 = 1;

/// Monotonic identifier assigned to a vector on insertion.
pub type VectorId = u64;

/// A single stored vector, keyed by its monotonic id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    /// Monotonic identifier.
    pub id: VectorId,
    /// Dense vector payload.
    pub vector: Vec<f32>,
}

/// Serialized snapshot for on-disk persistence (one file per project).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSnapshot {
    /// Snapshot schema version; bumped whenever the on-disk layout changes.
    pub version: u32,
    /// Vector dimensionality; load fails fast on mismatch.
    pub dimension: u32,
    /// Stored vector records, in insertion order.
    pub records: Vec<VectorRecord>,
}

/// A single search hit. `score` is squared Euclidean distance — lower is
/// closer. Results are sorted ascending by score, ties broken by id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorMatch {
    /// Identifier of the matched vector.
    pub id: VectorId,
    /// Squared L2 distance to the query vector.
    pub score: f32,
}

/// Outcome of comparing the index's contents against the storage engine's
/// view of which `vector_id`s ought to exist.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Ids storage expects but the index does not contain.
    pub missing_from_index: Vec<VectorId>,
    /// Ids the index contains but storage no longer references.
    pub extra_in_index: Vec<VectorId>,
    /// True when `missing_from_index` or `extra_in_index` is non-empty.
    pub count_mismatch: bool,
}

impl SyncReport {
    /// True when the index and storage agree exactly.
    #[must_use]
    pub const fn is_in_sync(&self) -> bool {
        !self.count_mismatch
    }
}

/// In-memory, append-only flat vector index with brute-force L2 search.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: u32,
    records: Vec<VectorRecord>,
    next_id: VectorId,
}

impl VectorIndex {
    /// Create an empty index for the given dimension.
    pub fn new(dimension: u32) -> Result<Self> {
        if dimension == 0 {
            return Err(ErrorEnvelope::expected(
                ErrorCode::new("vector", "invalid_dimension"),
                "dimension must be greater than zero",
            ));
        }
        Ok(Self {
            dimension,
            records: Vec::new(),
            next_id: 0,
        })
    }

    /// Return the configured vector dimension.
    #[must_use]
    pub const fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Number of vectors currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the index holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a vector and return its newly assigned, monotonic id.
    pub fn add(&mut self, vector: Vec<f32>) -> Result<VectorId> {
        ensure_dimension(self.dimension, &vector)?;
        let id = self.next_id;
        self.records.push(VectorRecord { id, vector });
        self.next_id = self.next_id.saturating_add(1);
        Ok(id)
    }

    /// Brute-force k-nearest-neighbor search by squared L2 distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        ensure_dimension(self.dimension, query)?;

        let mut matches: Vec<VectorMatch> = self
            .records
            .iter()
            .map(|record| VectorMatch {
                id: record.id,
                score: squared_l2(query, &record.vector),
            })
            .collect();

        matches.sort_by(|a, b| match a.score.total_cmp(&b.score) {
            std::cmp::Ordering::Equal => a.id.cmp(&b.id),
            ordering => ordering,
        });
        matches.truncate(k);
        Ok(matches)
    }

    /// Rebuild the whole index from a supplied iterator of `(id, vector)`
    /// pairs, typically the storage engine's authoritative chunk rows. The
    /// next assignable id becomes one greater than the maximum id in the
    /// stream (or is left unchanged if the stream is empty).
    pub fn rebuild_from<I>(&mut self, vectors: I) -> Result<()>
    where
        I: IntoIterator<Item = (VectorId, Vec<f32>)>,
    {
        let mut records = Vec::new();
        let mut max_id: Option<VectorId> = None;
        for (id, vector) in vectors {
            ensure_dimension(self.dimension, &vector)?;
            max_id = Some(max_id.map_or(id, |current| current.max(id)));
            records.push(VectorRecord { id, vector });
        }
        records.sort_by_key(|record| record.id);
        self.records = records;
        if let Some(max_id) = max_id {
            self.next_id = self.next_id.max(max_id.saturating_add(1));
        }
        Ok(())
    }

    /// Compare the ids stored here against the set of ids storage expects
    /// to exist. On divergence the caller should invoke [`Self::rebuild_from`].
    #[must_use]
    pub fn check_sync(&self, storage_ids: &BTreeSet<VectorId>) -> SyncReport {
        let index_ids: BTreeSet<VectorId> = self.records.iter().map(|record| record.id).collect();

        let missing_from_index: Vec<VectorId> =
            storage_ids.difference(&index_ids).copied().collect();
        let extra_in_index: Vec<VectorId> = index_ids.difference(storage_ids).copied().collect();
        let count_mismatch = !missing_from_index.is_empty() || !extra_in_index.is_empty();

        SyncReport {
            missing_from_index,
            extra_in_index,
            count_mismatch,
        }
    }

    /// Export the index into a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> VectorSnapshot {
        VectorSnapshot {
            version: VECTOR_SNAPSHOT_VERSION,
            dimension: self.dimension,
            records: self.records.clone(),
        }
    }

    /// Restore an index from a snapshot, recomputing `next_id` so that it is
    /// never less than `storage_watermark` (the max `vector_id` the storage
    /// engine currently has on file) — this is what lets a rebuild after a
    /// partial crash avoid id collisions.
    pub fn from_snapshot(snapshot: VectorSnapshot, storage_watermark: Option<VectorId>) -> Result<Self> {
        if snapshot.version != VECTOR_SNAPSHOT_VERSION {
            return Err(ErrorEnvelope::expected(
                ErrorCode::new("vector", "snapshot_version_mismatch"),
                "snapshot version mismatch",
            )
            .with_metadata("found", snapshot.version.to_string())
            .with_metadata("expected", VECTOR_SNAPSHOT_VERSION.to_string()));
        }

        let mut index = Self::new(snapshot.dimension)?;
        let max_record_id = snapshot.records.iter().map(|record| record.id).max();
        index.records = snapshot.records;

        let from_records = max_record_id.map(|id| id.saturating_add(1)).unwrap_or(0);
        let from_storage = storage_watermark.map(|id| id.saturating_add(1)).unwrap_or(0);
        index.next_id = from_records.max(from_storage);
        Ok(index)
    }

    /// Persist the index to `path` as a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| io_error("create_dir_all", &error))?;
        }
        let file = std::fs::File::create(path).map_err(|error| io_error("create", &error))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, &self.snapshot())
            .map_err(|error| serialize_error("save", &error))
    }

    /// Load the index from `path`, bringing `next_id` forward to at least
    /// `storage_watermark + 1` when the storage engine reports a newer id.
    pub fn load(path: &Path, storage_watermark: Option<VectorId>) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|error| io_error("open", &error))?;
        let reader = BufReader::new(file);
        let snapshot: VectorSnapshot =
            serde_json::from_reader(reader).map_err(|error| serialize_error("load", &error))?;
        Self::from_snapshot(snapshot, storage_watermark)
    }
}

fn ensure_dimension(dimension: u32, vector: &[f32]) -> Result<()> {
    let dimension = usize::try_from(dimension).map_err(|_| {
        ErrorEnvelope::unexpected(
            ErrorCode::new("vector", "invalid_dimension"),
            "dimension conversion overflow",
            ErrorClass::NonRetriable,
        )
    })?;
    if vector.len() != dimension {
        return Err(ErrorEnvelope::expected(
            ErrorCode::new("vector", "invalid_dimension"),
            "vector dimension mismatch",
        )
        .with_metadata("expected", dimension.to_string())
        .with_metadata("found", vector.len().to_string()));
    }
    Ok(())
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn io_error(operation: &'static str, error: &std::io::Error) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("vector", "io_error"),
        format!("vector index {operation} failed: {error}"),
        ErrorClass::Retriable,
    )
    .with_metadata("operation", operation)
}

fn serialize_error(operation: &'static str, error: &serde_json::Error) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("vector", "serialize_error"),
        format!("vector index {operation} failed: {error}"),
        ErrorClass::NonRetriable,
    )
    .with_metadata("operation", operation)
}

/// Returns the vector crate version.
#[must_use]
pub const fn vector_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_shared::shared_crate_version;

    #[test]
    fn vector_crate_compiles() {
        assert!(!vector_crate_version().is_empty());
    }

    #[test]
    fn vector_can_use_shared() {
        assert!(!shared_crate_version().is_empty());
    }

    #[test]
    fn add_assigns_monotonic_ids() -> Result<()> {
        let mut index = VectorIndex::new(2)?;
        let first = index.add(vec![0.0, 0.0])?;
        let second = index.add(vec![1.0, 1.0])?;
        assert_eq!(first, 0);
        assert_eq!(second, 1);
        Ok(())
    }

    #[test]
    fn search_prefers_closer_vectors() -> Result<()> {
        let mut index = VectorIndex::new(2)?;
        let near = index.add(vec![0.1, 0.1])?;
        let _far = index.add(vec![0.9, 0.9])?;

        let matches = index.search(&[0.1, 0.1], 2)?;
        assert_eq!(matches.first().map(|m| m.id), Some(near));
        Ok(())
    }

    #[test]
    fn invalid_dimension_rejected() {
        let result = VectorIndex::new(0);
        assert!(result.is_err());
    }

    #[test]
    fn dimension_mismatch_on_add_is_rejected() -> Result<()> {
        let mut index = VectorIndex::new(3)?;
        let result = index.add(vec![0.0, 0.0]);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn rebuild_from_sets_next_id_past_max() -> Result<()> {
        let mut index = VectorIndex::new(2)?;
        index.rebuild_from(vec![(5u64, vec![0.0, 0.0]), (2u64, vec![1.0, 1.0])])?;
        let next = index.add(vec![0.5, 0.5])?;
        assert_eq!(next, 6);
        Ok(())
    }

    #[test]
    fn check_sync_reports_missing_and_extra() -> Result<()> {
        let mut index = VectorIndex::new(2)?;
        index.add(vec![0.0, 0.0])?; // id 0
        index.add(vec![1.0, 1.0])?; // id 1

        let storage_ids: BTreeSet<VectorId> = [0u64, 2u64].into_iter().collect();
        let report = index.check_sync(&storage_ids);

        assert_eq!(report.missing_from_index, vec![2]);
        assert_eq!(report.extra_in_index, vec![1]);
        assert!(!report.is_in_sync());
        Ok(())
    }

    #[test]
    fn check_sync_in_sync_when_ids_match() -> Result<()> {
        let mut index = VectorIndex::new(2)?;
        index.add(vec![0.0, 0.0])?;
        let storage_ids: BTreeSet<VectorId> = [0u64].into_iter().collect();
        assert!(index.check_sync(&storage_ids).is_in_sync());
        Ok(())
    }

    #[test]
    fn snapshot_roundtrip_restores_index() -> Result<()> {
        let mut index = VectorIndex::new(2)?;
        index.add(vec![0.5, 0.5])?;

        let snapshot = index.snapshot();
        let restored = VectorIndex::from_snapshot(snapshot, None)?;
        let matches = restored.search(&[0.5, 0.5], 1)?;

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, 0);
        Ok(())
    }

    #[test]
    fn from_snapshot_honors_storage_watermark() -> Result<()> {
        let mut index = VectorIndex::new(2)?;
        index.add(vec![0.0, 0.0])?;
        let snapshot = index.snapshot();

        let restored = VectorIndex::from_snapshot(snapshot, Some(41))?;
        let mut restored = restored;
        let next = restored.add(vec![1.0, 1.0])?;
        assert_eq!(next, 42);
        Ok(())
    }

    #[test]
    fn save_and_load_round_trip(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = std::env::temp_dir().join(format!(
            "pyindex-vector-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("vectors.json");

        let mut index = VectorIndex::new(2)?;
        index.add(vec![0.2, 0.3])?;
        index.save(&path)?;

        let loaded = VectorIndex::load(&path, None)?;
        assert_eq!(loaded.len(), 1);

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
