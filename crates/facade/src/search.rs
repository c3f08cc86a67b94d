//! The one client-facing search command (spec.md §A.5): embed a query via
//! EE, search the project's Vector Index, and join matching `code_chunks`
//! rows from Storage. Reuses [`ChunkVectorizeWorkerDeps`] verbatim — the
//! three collaborators a search needs (storage, embedder, vector index
//! factory) are exactly the ones that worker already carries.

use pyindex_app::ChunkVectorizeWorkerDeps;
use pyindex_ports::{EmbedChunksRequest, EmbedKind, EmbedderPort, SqlValue};
use pyindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use uuid::Uuid;

/// Probe a live embedder for its output dimension, so the Vector Index
/// factory can be built with a fixed dimension before any worker cycle
/// runs (spec.md §4.2: the index file must be self-describing, but the
/// dimension it's created with has to come from somewhere on first use).
pub async fn detect_embedding_dimension(ctx: &RequestContext, embedder: &dyn EmbedderPort) -> Result<u32> {
    let probe = embedder
        .get_chunks(ctx, EmbedChunksRequest { text: "probe".into(), kind: EmbedKind::Code, language: None })
        .await?;
    let Some(chunk) = probe.chunks.into_iter().next() else {
        return Err(ErrorEnvelope::unexpected(
            ErrorCode::embed_fatal_error(),
            "embedder returned zero chunks for dimension probe",
            pyindex_shared::ErrorClass::NonRetriable,
        ));
    };
    u32::try_from(chunk.embedding.len())
        .map_err(|_| ErrorEnvelope::invariant(ErrorCode::internal(), "embedding dimension overflowed u32"))
}

/// One search request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Project to search within.
    pub project_id: Uuid,
    /// Free-text query.
    pub text: Box<str>,
    /// Maximum number of matches to return.
    pub top_k: usize,
}

/// One ranked search match, joined back to its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Path of the file containing the match, relative to the project root.
    pub file_path: String,
    /// The matched chunk's text.
    pub chunk_text: String,
    /// Name of the owning class/method/function, when the chunk belongs
    /// to one (module-level docstrings have none).
    pub entity_name: Option<String>,
    /// Lower the score, the closer the match (squared L2 distance).
    pub score: f32,
}

/// Embed `query.text`, search the project's Vector Index for its nearest
/// neighbors, and join each match back to its chunk/file row.
pub async fn run_search(ctx: &RequestContext, deps: &ChunkVectorizeWorkerDeps, query: SearchQuery) -> Result<Vec<SearchResult>> {
    let embedded = deps
        .embedder
        .get_chunks(ctx, EmbedChunksRequest { text: query.text, kind: EmbedKind::Code, language: None })
        .await?;
    let Some(first_chunk) = embedded.chunks.into_iter().next() else {
        return Ok(Vec::new());
    };

    let index = deps.vector_indexes.get_or_create(query.project_id)?;
    let matches = index.search(ctx, first_chunk.embedding, query.top_k).await?;

    let mut results = Vec::with_capacity(matches.len());
    for found in matches {
        let row = deps
            .storage
            .execute(
                ctx,
                None,
                "SELECT code_chunks.chunk_text, files.path, \
                 COALESCE(classes.name, methods.name, functions.name) AS entity_name \
                 FROM code_chunks \
                 JOIN files ON files.file_id = code_chunks.file_id \
                 LEFT JOIN classes ON classes.id = code_chunks.class_id \
                 LEFT JOIN methods ON methods.id = code_chunks.method_id \
                 LEFT JOIN functions ON functions.id = code_chunks.function_id \
                 WHERE code_chunks.vector_id = ?1 AND files.project_id = ?2",
                vec![
                    SqlValue::Integer(i64::try_from(found.vector_id).unwrap_or(i64::MAX)),
                    SqlValue::Text(query.project_id.to_string()),
                ],
            )
            .await?;

        let Some(columns) = row.rows.into_iter().next() else {
            continue;
        };
        results.push(search_result_from_row(columns, found.score)?);
    }

    Ok(results)
}

fn search_result_from_row(columns: pyindex_ports::SqlRow, score: f32) -> Result<SearchResult> {
    let mut chunk_text = None;
    let mut file_path = None;
    let mut entity_name = None;

    for (name, value) in columns {
        match (&*name, value) {
            ("chunk_text", SqlValue::Text(text)) => chunk_text = Some(text),
            ("path", SqlValue::Text(text)) => file_path = Some(text),
            ("entity_name", SqlValue::Text(text)) => entity_name = Some(text),
            ("entity_name", SqlValue::Null) => {},
            _ => {},
        }
    }

    let chunk_text = chunk_text
        .ok_or_else(|| ErrorEnvelope::invariant(ErrorCode::storage_error(), "search result row missing chunk_text"))?;
    let file_path =
        file_path.ok_or_else(|| ErrorEnvelope::invariant(ErrorCode::storage_error(), "search result row missing path"))?;

    Ok(SearchResult { file_path, chunk_text, entity_name, score })
}
