//! Embedder boundary contract (spec.md §4.5, §6).
//!
//! Net-new relative to the teacher's `EmbeddingPort` (`embedding.rs`, left
//! undeclared as in-tree reference): EE is a single out-of-process HTTP
//! collaborator exposing one `get_chunks` call that turns a docstring into
//! zero or more embedded chunks, rather than a single-text-in/single-vector-
//! out provider abstraction.

use crate::BoxFuture;
use pyindex_domain::Language;
use pyindex_shared::{RequestContext, Result};

/// Kind of text submitted to EE (spec.md §6: `kind ∈ {DocBlock, Code}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    /// A docstring or other prose documentation block.
    DocBlock,
    /// A source code excerpt.
    Code,
}

/// Request to [`EmbedderPort::get_chunks`].
#[derive(Debug, Clone)]
pub struct EmbedChunksRequest {
    /// Raw text to chunk and embed.
    pub text: Box<str>,
    /// What kind of text this is.
    pub kind: EmbedKind,
    /// Source language, when known.
    pub language: Option<Language>,
}

/// A single embedded chunk returned by EE.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    /// The chunk's text, as split by EE (may differ from the input text —
    /// EE may split one docstring into several chunks).
    pub text: Box<str>,
    /// Dense embedding vector.
    pub embedding: Vec<f32>,
    /// Token count EE reports consuming for this chunk.
    pub token_count: u32,
}

/// Response from [`EmbedderPort::get_chunks`].
#[derive(Debug, Clone)]
pub struct EmbedChunksResponse {
    /// Zero or more embedded chunks. Empty is valid (spec.md §4.5:
    /// an empty or whitespace-only docstring yields no chunks).
    pub chunks: Vec<EmbeddedChunk>,
    /// EE-reported wall-clock processing time, seconds.
    pub processing_time: f64,
}

/// Boundary contract for the out-of-process Embedder (spec.md §4.5).
///
/// Failure semantics are split at the port boundary into the two error
/// kinds a caller must distinguish (spec.md §7): `EmbedTransientError`
/// (retry with backoff) and `EmbedFatalError` (give up on this chunk,
/// leave its `embedding_vector` `None`).
pub trait EmbedderPort: Send + Sync {
    /// Split and embed a block of text.
    fn get_chunks(
        &self,
        ctx: &RequestContext,
        request: EmbedChunksRequest,
    ) -> BoxFuture<'_, Result<EmbedChunksResponse>>;
}
