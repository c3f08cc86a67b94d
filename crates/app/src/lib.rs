//! # semantic-code-app
//!
//! Application use cases for indexing and search.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod chunk_vectorize_worker;
pub mod file_watcher;
pub mod indexing_worker;

/// Placeholder module for application use cases.
pub mod placeholder {
    /// Placeholder function to verify the crate compiles.
    #[must_use]
    pub const fn app_crate_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

pub use chunk_vectorize_worker::{
    ChunkVectorizeWorkerDeps, VectorIndexFactory, VectorizeCycleOutcome, VectorizerBreaker,
    run_vectorize_cycle,
};
pub use file_watcher::{FileWatcherDeps, scan_watch_dir};
pub use indexing_worker::{IndexingCycleOutcome, IndexingWorkerDeps, IndexingWorkerState, run_indexing_cycle};
pub use placeholder::app_crate_version;

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_domain::domain_crate_version;
    use pyindex_ports::ports_crate_version;
    use pyindex_shared::shared_crate_version;

    #[test]
    fn app_crate_compiles() {
        let version = app_crate_version();
        assert!(!version.is_empty());
    }

    #[test]
    fn app_can_use_ports_domain_shared() {
        let ports_version = ports_crate_version();
        let domain_version = domain_crate_version();
        let shared_version = shared_crate_version();

        assert!(!ports_version.is_empty());
        assert!(!domain_version.is_empty());
        assert!(!shared_version.is_empty());
    }
}
