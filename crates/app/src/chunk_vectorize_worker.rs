//! Chunking/Vectorization Worker use case (spec.md §4.5).
//!
//! Net-new — Phase A grounds on `EmbedderPort::get_chunks`'s split-at-the-
//! boundary failure semantics (spec.md §7: `EmbedTransientError` vs
//! `EmbedFatalError`); Phase B grounds on `VectorIndexPort`'s append-only,
//! `check_sync`/`rebuild_from` reconciliation contract. The breaker is a
//! single boolean with a cooldown, in the style of the teacher's
//! `index_codebase` stats collector tracking one outcome across a batch.

use pyindex_domain::{EntityId, Language};
use pyindex_ports::{EmbedChunksRequest, EmbedKind, EmbedderPort, SqlValue, StoragePort, VectorIndexPort};
use pyindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::sync::Arc;
use uuid::Uuid;

/// Resolves (and lazily creates) the per-project Vector Index instance
/// CVW should use for a given project. Kept as an app-layer seam, since
/// picking the right on-disk index file is a composition-time concern,
/// not a port boundary itself.
pub trait VectorIndexFactory: Send + Sync {
    /// Returns the Vector Index for `project_id`, loading it first if this
    /// is the first reference this process has made to it.
    fn get_or_create(&self, project_id: Uuid) -> Result<Arc<dyn VectorIndexPort>>;
}

/// Collaborators one chunk/vectorize cycle needs.
pub struct ChunkVectorizeWorkerDeps {
    pub storage: Arc<dyn StoragePort>,
    pub embedder: Arc<dyn EmbedderPort>,
    pub vector_indexes: Arc<dyn VectorIndexFactory>,
}

/// Single boolean circuit breaker over consecutive `EmbedTransientError`s
/// (spec.md §4.5 "circuit breaker"). Carried between cycles by the
/// caller, same as [`crate::indexing_worker::IndexingWorkerState`].
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorizerBreaker {
    consecutive_transient_failures: u32,
    opened_at: Option<f64>,
}

impl VectorizerBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the breaker is open and its cooldown has not elapsed.
    #[must_use]
    pub fn is_open(&self, now: f64, cooldown_ms: u64) -> bool {
        self.opened_at.is_some_and(|opened_at| now - opened_at < cooldown_ms as f64 / 1000.0)
    }

    /// True once the breaker has tripped, regardless of cooldown elapsed.
    /// Used within a single cycle to stop issuing further EE calls right
    /// after the threshold is crossed.
    fn is_tripped(&self) -> bool {
        self.opened_at.is_some()
    }

    fn record_transient_failure(&mut self, now: f64, threshold: u32) {
        self.consecutive_transient_failures += 1;
        if self.consecutive_transient_failures >= threshold {
            self.opened_at = Some(now);
        }
    }

    fn record_success(&mut self) {
        self.consecutive_transient_failures = 0;
        self.opened_at = None;
    }
}

/// Outcome of one cycle, fed into `worker_stats` by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorizeCycleOutcome {
    pub chunked_files: u64,
    pub assigned_vectors: u64,
    pub errors: u64,
}

/// Run one Phase A (chunk + embed) then Phase B (vector id assignment)
/// pass, followed by a per-project sync check (spec.md §4.5 steps 1-6).
pub async fn run_vectorize_cycle(
    ctx: &RequestContext,
    deps: &ChunkVectorizeWorkerDeps,
    breaker: &mut VectorizerBreaker,
    chunk_batch: u32,
    faiss_batch: u32,
    min_chunk_length: u32,
    breaker_threshold: u32,
    breaker_cooldown_ms: u64,
    now: f64,
) -> Result<VectorizeCycleOutcome> {
    let mut outcome = VectorizeCycleOutcome::default();

    if breaker.is_open(now, breaker_cooldown_ms) {
        run_vector_id_assignment(ctx, deps, faiss_batch, &mut outcome).await?;
        reconcile_vector_indexes(ctx, deps).await?;
        return Ok(outcome);
    }

    run_chunking_phase(ctx, deps, breaker, chunk_batch, min_chunk_length, breaker_threshold, now, &mut outcome).await?;
    run_vector_id_assignment(ctx, deps, faiss_batch, &mut outcome).await?;
    reconcile_vector_indexes(ctx, deps).await?;

    Ok(outcome)
}

async fn run_chunking_phase(
    ctx: &RequestContext,
    deps: &ChunkVectorizeWorkerDeps,
    breaker: &mut VectorizerBreaker,
    chunk_batch: u32,
    min_chunk_length: u32,
    breaker_threshold: u32,
    now: f64,
    outcome: &mut VectorizeCycleOutcome,
) -> Result<()> {
    let files = select_files_needing_chunks(ctx, &deps.storage, chunk_batch).await?;

    for file_id in files {
        if breaker.is_tripped() {
            break;
        }
        ctx.ensure_not_cancelled("chunk_vectorize_worker.chunk")?;
        let entities = docstring_entities(ctx, &deps.storage, file_id).await?;

        for entity in entities {
            if breaker.is_tripped() {
                break;
            }
            if entity.docstring.trim().len() < min_chunk_length as usize {
                continue;
            }

            let request = EmbedChunksRequest { text: entity.docstring.clone().into_boxed_str(), kind: EmbedKind::DocBlock, language: Some(Language::Python) };
            match deps.embedder.get_chunks(ctx, request).await {
                Ok(response) => {
                    breaker.record_success();
                    persist_chunks(ctx, &deps.storage, file_id, &entity, &response.chunks.iter().map(|c| (c.text.to_string(), Some(c.embedding.clone()), Some(c.token_count))).collect::<Vec<_>>()).await?;
                },
                Err(error) if error.code == ErrorCode::embed_transient_error() => {
                    breaker.record_transient_failure(now, breaker_threshold);
                    outcome.errors += 1;
                },
                Err(error) if error.code == ErrorCode::embed_fatal_error() => {
                    persist_chunks(ctx, &deps.storage, file_id, &entity, &[(entity.docstring.clone(), None, None)]).await?;
                    outcome.errors += 1;
                },
                Err(_error) => {
                    outcome.errors += 1;
                },
            }
        }

        outcome.chunked_files += 1;
    }

    Ok(())
}

struct DocstringEntity {
    class_id: Option<EntityId>,
    method_id: Option<EntityId>,
    function_id: Option<EntityId>,
    docstring: String,
}

async fn select_files_needing_chunks(ctx: &RequestContext, storage: &Arc<dyn StoragePort>, chunk_batch: u32) -> Result<Vec<i64>> {
    let result = storage
        .execute(
            ctx,
            None,
            "SELECT file_id FROM files WHERE has_docstring = 1 AND (deleted = 0 OR deleted IS NULL) \
             AND NOT EXISTS (SELECT 1 FROM code_chunks WHERE code_chunks.file_id = files.file_id) \
             ORDER BY updated_at ASC LIMIT ?1",
            vec![SqlValue::Integer(i64::from(chunk_batch))],
        )
        .await?;

    result.rows.iter().map(|row| integer_column(row, "file_id")).collect()
}

async fn docstring_entities(ctx: &RequestContext, storage: &Arc<dyn StoragePort>, file_id: i64) -> Result<Vec<DocstringEntity>> {
    let mut entities = Vec::new();

    let classes = storage
        .execute(ctx, None, "SELECT id, docstring FROM classes WHERE file_id = ?1 AND docstring IS NOT NULL", vec![SqlValue::Integer(file_id)])
        .await?;
    for row in &classes.rows {
        entities.push(DocstringEntity {
            class_id: Some(EntityId::new(integer_column(row, "id")?).map_err(ErrorEnvelope::from)?),
            method_id: None,
            function_id: None,
            docstring: text_column(row, "docstring")?,
        });
    }

    let methods = storage
        .execute(ctx, None, "SELECT id, docstring FROM methods WHERE file_id = ?1 AND docstring IS NOT NULL", vec![SqlValue::Integer(file_id)])
        .await?;
    for row in &methods.rows {
        entities.push(DocstringEntity {
            class_id: None,
            method_id: Some(EntityId::new(integer_column(row, "id")?).map_err(ErrorEnvelope::from)?),
            function_id: None,
            docstring: text_column(row, "docstring")?,
        });
    }

    let functions = storage
        .execute(ctx, None, "SELECT id, docstring FROM functions WHERE file_id = ?1 AND docstring IS NOT NULL", vec![SqlValue::Integer(file_id)])
        .await?;
    for row in &functions.rows {
        entities.push(DocstringEntity {
            class_id: None,
            method_id: None,
            function_id: Some(EntityId::new(integer_column(row, "id")?).map_err(ErrorEnvelope::from)?),
            docstring: text_column(row, "docstring")?,
        });
    }

    Ok(entities)
}

async fn persist_chunks(
    ctx: &RequestContext,
    storage: &Arc<dyn StoragePort>,
    file_id: i64,
    entity: &DocstringEntity,
    chunks: &[(String, Option<Vec<f32>>, Option<u32>)],
) -> Result<()> {
    for (ordinal, (text, embedding, token_count)) in chunks.iter().enumerate() {
        storage
            .execute(
                ctx,
                None,
                "INSERT INTO code_chunks (file_id, class_id, method_id, function_id, chunk_ordinal, chunk_text, embedding_vector, token_count, vector_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
                vec![
                    SqlValue::Integer(file_id),
                    entity.class_id.map_or(SqlValue::Null, |id| SqlValue::Integer(id.value())),
                    entity.method_id.map_or(SqlValue::Null, |id| SqlValue::Integer(id.value())),
                    entity.function_id.map_or(SqlValue::Null, |id| SqlValue::Integer(id.value())),
                    SqlValue::Integer(ordinal as i64),
                    SqlValue::Text(text.clone()),
                    embedding.as_ref().map_or(SqlValue::Null, |vector| SqlValue::Blob(encode_vector(vector))),
                    token_count.map_or(SqlValue::Null, |count| SqlValue::Integer(i64::from(count))),
                ],
            )
            .await?;
    }
    Ok(())
}

async fn run_vector_id_assignment(ctx: &RequestContext, deps: &ChunkVectorizeWorkerDeps, faiss_batch: u32, outcome: &mut VectorizeCycleOutcome) -> Result<()> {
    let result = deps
        .storage
        .execute(
            ctx,
            None,
            "SELECT code_chunks.id AS chunk_id, files.project_id AS project_id, code_chunks.embedding_vector AS embedding_vector \
             FROM code_chunks JOIN files ON files.file_id = code_chunks.file_id \
             WHERE code_chunks.embedding_vector IS NOT NULL AND code_chunks.vector_id IS NULL \
             LIMIT ?1",
            vec![SqlValue::Integer(i64::from(faiss_batch))],
        )
        .await?;

    let mut touched_projects = std::collections::HashSet::new();

    for row in &result.rows {
        ctx.ensure_not_cancelled("chunk_vectorize_worker.assign")?;
        let chunk_id = integer_column(row, "chunk_id")?;
        let project_id = parse_uuid_column(row, "project_id")?;
        let vector = decode_vector(&blob_column(row, "embedding_vector")?);

        let index = deps.vector_indexes.get_or_create(project_id)?;
        let vector_id = index.add(ctx, vector).await?;

        deps.storage
            .execute(ctx, None, "UPDATE code_chunks SET vector_id = ?1 WHERE id = ?2", vec![SqlValue::Integer(vector_id as i64), SqlValue::Integer(chunk_id)])
            .await?;

        touched_projects.insert(project_id);
        outcome.assigned_vectors += 1;
    }

    for project_id in touched_projects {
        let index = deps.vector_indexes.get_or_create(project_id)?;
        index.save(ctx).await?;
    }

    Ok(())
}

async fn reconcile_vector_indexes(ctx: &RequestContext, deps: &ChunkVectorizeWorkerDeps) -> Result<()> {
    let result = deps
        .storage
        .execute(ctx, None, "SELECT DISTINCT project_id FROM files", Vec::new())
        .await?;

    for row in &result.rows {
        let project_id = parse_uuid_column(row, "project_id")?;
        let vectorized = deps
            .storage
            .execute(
                ctx,
                None,
                "SELECT code_chunks.vector_id AS vector_id, code_chunks.embedding_vector AS embedding_vector \
                 FROM code_chunks JOIN files ON files.file_id = code_chunks.file_id \
                 WHERE files.project_id = ?1 AND code_chunks.vector_id IS NOT NULL",
                vec![SqlValue::Text(project_id.to_string())],
            )
            .await?;

        let mut pairs = Vec::with_capacity(vectorized.rows.len());
        let mut ids = Vec::with_capacity(vectorized.rows.len());
        for row in &vectorized.rows {
            let vector_id = integer_column(row, "vector_id")? as u64;
            let vector = decode_vector(&blob_column(row, "embedding_vector")?);
            ids.push(vector_id);
            pairs.push((vector_id, vector));
        }

        let index = deps.vector_indexes.get_or_create(project_id)?;
        let report = index.check_sync(ctx, ids).await?;
        if !report.in_sync() {
            index.rebuild_from(ctx, pairs).await?;
            index.save(ctx).await?;
        }
    }

    Ok(())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])).collect()
}

fn text_column(row: &pyindex_ports::SqlRow, name: &str) -> Result<String> {
    for (column, value) in row {
        if column.as_ref() == name {
            return match value {
                SqlValue::Text(text) => Ok(text.clone()),
                _ => Err(column_type_error(name)),
            };
        }
    }
    Err(missing_column_error(name))
}

fn integer_column(row: &pyindex_ports::SqlRow, name: &str) -> Result<i64> {
    for (column, value) in row {
        if column.as_ref() == name {
            return match value {
                SqlValue::Integer(value) => Ok(*value),
                _ => Err(column_type_error(name)),
            };
        }
    }
    Err(missing_column_error(name))
}

fn blob_column(row: &pyindex_ports::SqlRow, name: &str) -> Result<Vec<u8>> {
    for (column, value) in row {
        if column.as_ref() == name {
            return match value {
                SqlValue::Blob(bytes) => Ok(bytes.clone()),
                _ => Err(column_type_error(name)),
            };
        }
    }
    Err(missing_column_error(name))
}

fn parse_uuid_column(row: &pyindex_ports::SqlRow, name: &str) -> Result<Uuid> {
    let raw = text_column(row, name)?;
    Uuid::parse_str(&raw).map_err(|error| ErrorEnvelope::expected(ErrorCode::storage_error(), format!("invalid project id: {error}")))
}

fn missing_column_error(name: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::storage_error(), format!("missing column: {name}"))
}

fn column_type_error(name: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::storage_error(), format!("unexpected column type: {name}"))
}
