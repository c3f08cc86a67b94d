//! # pyindex-facade
//!
//! Composition root wiring config, adapters, ports, and the app use cases
//! together for CLI surfaces (spec.md §A.5).

pub mod config;
pub mod deps;
pub mod search;

pub use config::load_effective_config;
pub use deps::{
    ProjectVectorIndexFactory, build_chunk_vectorize_deps, build_embedder, build_file_watcher_deps,
    build_indexing_worker_deps, build_orchestrator_deps, connect_storage,
};
pub use pyindex_infra::{
    InfraError, InfraResult, OrchestratorDeps, WorkerGroup, WorkerRole, bind_storage_broker,
    build_worker_group, run_storage_broker, start_orchestrator, stop_orchestrator, tick,
    validate_env_parsing,
};
pub use pyindex_app::{
    IndexingCycleOutcome, IndexingWorkerState, VectorizeCycleOutcome, VectorizerBreaker,
    run_indexing_cycle, run_vectorize_cycle, scan_watch_dir,
};
pub use search::{SearchQuery, SearchResult, detect_embedding_dimension, run_search};

/// API v1 error payload type, re-exported for CLI formatting.
pub use pyindex_api::v1::{ApiV1ErrorDto, ApiV1ErrorKind};

/// Convert an infra error into an API v1 error payload (stable code + meta).
#[must_use]
pub fn infra_error_to_api_v1(error: &InfraError) -> ApiV1ErrorDto {
    pyindex_api::v1::error_envelope_to_api_v1_error(error, None)
}

/// Placeholder module for the facade layer.
pub mod placeholder {
    /// Placeholder function to verify the crate compiles.
    #[must_use]
    pub const fn facade_crate_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

pub use placeholder::facade_crate_version;

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_api::api_crate_version;
    use pyindex_app::app_crate_version;
    use pyindex_infra::infra_crate_version;

    #[test]
    fn facade_crate_compiles() {
        let version = facade_crate_version();
        assert!(!version.is_empty());
    }

    #[test]
    fn facade_can_use_infra_api_app() {
        let infra_version = infra_crate_version();
        let api_version = api_crate_version();
        let app_version_value = app_crate_version();

        assert!(!infra_version.is_empty());
        assert!(!api_version.is_empty());
        assert!(!app_version_value.is_empty());
    }
}
