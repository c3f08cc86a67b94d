//! Flat-file Vector Index adapter (spec.md §4.2).
//!
//! Wraps the `pyindex_vector::VectorIndex` kernel behind a `tokio::RwLock`
//! and a per-project file path, loosely grounded on the teacher's
//! `vectordb_local.rs` file-backed async-RwLock pattern — but with no
//! collection concept, matching spec.md §4.2 exactly.

use pyindex_ports::{BoxFuture, VectorIndexMatch, VectorIndexPort, VectorSyncReport};
use pyindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use pyindex_vector::VectorIndex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-project flat vector index, persisted to one file.
pub struct FlatFileVectorIndex {
    path: PathBuf,
    dimension: u32,
    index: Arc<RwLock<VectorIndex>>,
}

impl FlatFileVectorIndex {
    /// Open (without loading) a vector index at `path` with a fixed
    /// dimension. Call [`VectorIndexPort::load`] to restore from disk.
    pub fn new(path: PathBuf, dimension: u32) -> Result<Self> {
        let index = VectorIndex::new(dimension)?;
        Ok(Self {
            path,
            dimension,
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Configured vector dimension.
    #[must_use]
    pub const fn dimension(&self) -> u32 {
        self.dimension
    }
}

impl VectorIndexPort for FlatFileVectorIndex {
    fn add(&self, _ctx: &RequestContext, vector: Vec<f32>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut index = self.index.write().await;
            index.add(vector)
        })
    }

    fn search(
        &self,
        _ctx: &RequestContext,
        query: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<VectorIndexMatch>>> {
        Box::pin(async move {
            let index = self.index.read().await;
            let matches = index.search(&query, k)?;
            Ok(matches
                .into_iter()
                .map(|found| VectorIndexMatch {
                    vector_id: found.id,
                    score: found.score,
                })
                .collect())
        })
    }

    fn rebuild_from(
        &self,
        _ctx: &RequestContext,
        vectors: Vec<(u64, Vec<f32>)>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut index = self.index.write().await;
            index.rebuild_from(vectors)
        })
    }

    fn check_sync(
        &self,
        _ctx: &RequestContext,
        storage_vector_ids: Vec<u64>,
    ) -> BoxFuture<'_, Result<VectorSyncReport>> {
        Box::pin(async move {
            let index = self.index.read().await;
            let ids: BTreeSet<u64> = storage_vector_ids.into_iter().collect();
            let report = index.check_sync(&ids);
            Ok(VectorSyncReport {
                missing_from_index: report.missing_from_index,
                extra_in_index: report.extra_in_index,
                count_mismatch: report.count_mismatch,
            })
        })
    }

    fn save(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let path = self.path.clone();
            let snapshot = self.index.read().await.snapshot();
            tokio::task::spawn_blocking(move || {
                let index = VectorIndex::from_snapshot(snapshot, None)?;
                index.save(&path)
            })
            .await
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::internal(),
                    format!("vector index save task failed: {error}"),
                    pyindex_shared::ErrorClass::NonRetriable,
                )
            })?
        })
    }

    fn load(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let path = self.path.clone();
            let loaded = tokio::task::spawn_blocking(move || VectorIndex::load(&path, None))
                .await
                .map_err(|error| {
                    ErrorEnvelope::unexpected(
                        ErrorCode::internal(),
                        format!("vector index load task failed: {error}"),
                        pyindex_shared::ErrorClass::NonRetriable,
                    )
                })??;
            *self.index.write().await = loaded;
            Ok(())
        })
    }
}
