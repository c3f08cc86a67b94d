//! Composition root: wires config → adapters → ports → the app use cases
//! and infra orchestrator.

use pyindex_adapters::embedder_http::HttpEmbedder;
use pyindex_adapters::fs::{LocalFileSystem, LocalPathPolicy};
use pyindex_adapters::ignore::IgnoreMatcher;
use pyindex_adapters::lock::FileLockPort;
use pyindex_adapters::parser::python::TreeSitterPythonParser;
use pyindex_adapters::process::OsProcessSupervisor;
use pyindex_adapters::storage::StorageSocketClient;
use pyindex_adapters::vector_index::FlatFileVectorIndex;
use pyindex_app::{ChunkVectorizeWorkerDeps, FileWatcherDeps, IndexingWorkerDeps, VectorIndexFactory};
use pyindex_config::ValidatedPyIndexConfig;
use pyindex_domain::Language;
use pyindex_infra::OrchestratorDeps;
use pyindex_ports::{EmbedderPort, ParserPort, StoragePort};
use pyindex_shared::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Build a [`StoragePort`] client bound to `storage.request_socket`. Every
/// worker process (FW, IW, CVW, the `search` command) talks to Storage
/// through this socket; only `serve-storage` opens the SQLite file
/// directly (spec.md §4.1, §6).
#[must_use]
pub fn connect_storage(config: &ValidatedPyIndexConfig) -> Arc<dyn StoragePort> {
    Arc::new(StorageSocketClient::new(config.raw().storage.request_socket.clone()))
}

/// Build the Embedder adapter from `embedder.*` and `vectorizer.request_timeout`.
pub fn build_embedder(config: &ValidatedPyIndexConfig) -> Result<Arc<dyn EmbedderPort>> {
    let raw = config.raw();
    let embedder = HttpEmbedder::new(&raw.embedder, raw.vectorizer.request_timeout_ms)?;
    Ok(Arc::new(embedder))
}

/// Per-project flat-file Vector Index factory, caching one open index per
/// project for the lifetime of the process (spec.md §4.2).
pub struct ProjectVectorIndexFactory {
    vector_dir: PathBuf,
    dimension: u32,
    indexes: Mutex<HashMap<Uuid, Arc<dyn pyindex_ports::VectorIndexPort>>>,
}

impl ProjectVectorIndexFactory {
    /// `dimension` is fixed for the life of the process; detect it once
    /// against a live embedder before constructing this factory (see
    /// [`crate::search::detect_embedding_dimension`]).
    #[must_use]
    pub fn new(vector_dir: PathBuf, dimension: u32) -> Self {
        Self { vector_dir, dimension, indexes: Mutex::new(HashMap::new()) }
    }
}

impl VectorIndexFactory for ProjectVectorIndexFactory {
    fn get_or_create(&self, project_id: Uuid) -> Result<Arc<dyn pyindex_ports::VectorIndexPort>> {
        let mut indexes = self.indexes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(index) = indexes.get(&project_id) {
            return Ok(Arc::clone(index));
        }
        let path = self.vector_dir.join(format!("{project_id}.vec"));
        let index: Arc<dyn pyindex_ports::VectorIndexPort> = Arc::new(FlatFileVectorIndex::new(path, self.dimension)?);
        indexes.insert(project_id, Arc::clone(&index));
        Ok(index)
    }
}

/// Build collaborators for one File Watcher cycle.
#[must_use]
pub fn build_file_watcher_deps(config: &ValidatedPyIndexConfig, storage: Arc<dyn StoragePort>) -> FileWatcherDeps {
    let raw = config.raw();
    FileWatcherDeps {
        storage,
        filesystem: Arc::new(LocalFileSystem::new(None)),
        path_policy: Arc::new(LocalPathPolicy::new()),
        ignore: Arc::new(IgnoreMatcher::new()),
        lock: Arc::new(FileLockPort::new(raw.orchestrator.run_dir.clone(), "file-watcher")),
    }
}

/// Build collaborators for one Indexing Worker cycle. Only Python has a
/// real parser; config/unknown files are never routed to `index_file`.
#[must_use]
pub fn build_indexing_worker_deps(storage: Arc<dyn StoragePort>) -> IndexingWorkerDeps {
    let mut parsers: HashMap<Language, Arc<dyn ParserPort>> = HashMap::new();
    parsers.insert(Language::Python, Arc::new(TreeSitterPythonParser::new()));

    IndexingWorkerDeps {
        storage,
        filesystem: Arc::new(LocalFileSystem::new(None)),
        parsers,
    }
}

/// Build collaborators for one Chunk/Vectorize Worker cycle.
pub fn build_chunk_vectorize_deps(
    config: &ValidatedPyIndexConfig,
    storage: Arc<dyn StoragePort>,
    vector_dimension: u32,
) -> Result<ChunkVectorizeWorkerDeps> {
    let raw = config.raw();
    let vector_dir = raw.orchestrator.run_dir.join("vectors");
    std::fs::create_dir_all(&vector_dir).map_err(|error| {
        pyindex_shared::ErrorEnvelope::unexpected(
            pyindex_shared::ErrorCode::storage_error(),
            format!("failed to create vector index directory: {error}"),
            pyindex_shared::ErrorClass::NonRetriable,
        )
    })?;

    Ok(ChunkVectorizeWorkerDeps {
        storage,
        embedder: build_embedder(config)?,
        vector_indexes: Arc::new(ProjectVectorIndexFactory::new(vector_dir, vector_dimension)),
    })
}

/// Build collaborators for the Worker Orchestrator.
#[must_use]
pub fn build_orchestrator_deps(storage: Arc<dyn StoragePort>) -> OrchestratorDeps {
    OrchestratorDeps { storage, process: Arc::new(OsProcessSupervisor::new()) }
}
