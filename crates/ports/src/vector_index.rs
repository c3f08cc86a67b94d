//! Vector Index boundary contract (spec.md §4.2).
//!
//! Net-new relative to the teacher's Milvus-shaped `VectorDbPort`
//! (`vectordb.rs`, left undeclared as in-tree reference): the spec's VI
//! has no collection concept, a monotonic integer id instead of a string
//! key, and exactly the six operations below.

use crate::BoxFuture;
use pyindex_shared::{RequestContext, Result};

/// Outcome of comparing the index against the ids Storage believes are
/// vectorized (spec.md §4.2 `check_sync`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorSyncReport {
    /// Ids Storage has but the index is missing.
    pub missing_from_index: Vec<u64>,
    /// Ids the index has but Storage no longer references.
    pub extra_in_index: Vec<u64>,
    /// True when the index and Storage id counts disagree.
    pub count_mismatch: bool,
}

impl VectorSyncReport {
    /// True when the index matches Storage exactly.
    #[must_use]
    pub fn in_sync(&self) -> bool {
        self.missing_from_index.is_empty() && self.extra_in_index.is_empty() && !self.count_mismatch
    }
}

/// A single scored match returned from [`VectorIndexPort::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorIndexMatch {
    /// Matched vector's id.
    pub vector_id: u64,
    /// Distance score (lower is closer, per spec.md Open Question 1's
    /// squared-L2 decision).
    pub score: f32,
}

/// Boundary contract for the per-project dense Vector Index
/// (spec.md §4.2). Append-only: there is deliberately no delete
/// operation, matching the spec's "vector_id IS NOT NULL" ownership
/// model (§3, §9) where stale entries are resolved by `rebuild_from`.
pub trait VectorIndexPort: Send + Sync {
    /// Append a vector and return its newly assigned, monotonic id.
    fn add(&self, ctx: &RequestContext, vector: Vec<f32>) -> BoxFuture<'_, Result<u64>>;

    /// Find the `k` nearest neighbors of `query`.
    fn search(
        &self,
        ctx: &RequestContext,
        query: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<VectorIndexMatch>>>;

    /// Rebuild the entire index from a supplied set of `(vector_id, vector)`
    /// pairs, replacing all prior contents.
    fn rebuild_from(&self, ctx: &RequestContext, vectors: Vec<(u64, Vec<f32>)>) -> BoxFuture<'_, Result<()>>;

    /// Compare the index's id set against the ids Storage believes are
    /// vectorized. On divergence, the caller is expected to invoke
    /// `rebuild_from`.
    fn check_sync(
        &self,
        ctx: &RequestContext,
        storage_vector_ids: Vec<u64>,
    ) -> BoxFuture<'_, Result<VectorSyncReport>>;

    /// Persist the index to its per-project file.
    fn save(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>>;

    /// Restore the index from its per-project file.
    fn load(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>>;
}
