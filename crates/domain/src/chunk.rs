//! Chunk content with compile-time max length, and the persisted
//! `CodeChunk` entity (spec.md §3).

use crate::cross_ref::EntityRef;
use crate::primitives::{EntityId, FileId};
use pyindex_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard upper bound for chunk content length.
pub const MAX_CHUNK_CHARS: usize = 20_000;

/// Error when chunk content exceeds the maximum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkError {
    /// Observed length.
    pub length: usize,
    /// Maximum allowed length.
    pub max: usize,
}

impl fmt::Display for ChunkError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "chunk length {} exceeds max {}",
            self.length, self.max
        )
    }
}

impl std::error::Error for ChunkError {}

impl From<ChunkError> for ErrorEnvelope {
    fn from(error: ChunkError) -> Self {
        Self::expected(
            ErrorCode::new("domain", "chunk_too_large"),
            error.to_string(),
        )
        .with_metadata("length", error.length.to_string())
        .with_metadata("max", error.max.to_string())
    }
}

/// Chunk content capped by a compile-time max length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chunk<const MAX: usize>(Box<str>);

impl<const MAX: usize> Chunk<MAX> {
    /// Validate and build a chunk from content.
    pub fn new(content: impl Into<Box<str>>) -> Result<Self, ChunkError> {
        let content = content.into();
        let length = content.len();
        if length > MAX {
            return Err(ChunkError { length, max: MAX });
        }
        Ok(Self(content))
    }

    /// Borrow the chunk content.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the chunk content.
    #[must_use]
    pub fn into_inner(self) -> Box<str> {
        self.0
    }
}

impl<const MAX: usize> AsRef<str> for Chunk<MAX> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A chunk of docstring text produced by CVW Phase A, optionally carrying
/// an embedding and a Vector Index assignment (spec.md §3 "CodeChunk").
///
/// Uniqueness: at most one chunk per `(owning entity, ordinal)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Row identifier, assigned by the Storage Engine.
    pub id: EntityId,
    /// Owning file.
    pub file_id: FileId,
    /// Owning entity, if the chunk is attached to a class/method/function
    /// rather than the file as a whole.
    pub owner: Option<EntityRef>,
    /// Position of this chunk among its owner's chunks, zero-based.
    pub ordinal: u32,
    /// Chunk text, bounded by [`MAX_CHUNK_CHARS`].
    pub text: Chunk<MAX_CHUNK_CHARS>,
    /// Dense embedding, absent until EE returns one (spec.md §4.5 failure
    /// semantics: chunks without an embedding are persisted as `None`
    /// here and stay invisible to Phase B).
    pub embedding_vector: Option<Vec<f32>>,
    /// Token count reported by EE.
    pub token_count: Option<u32>,
    /// Name of the embedding model that produced `embedding_vector`.
    pub embedding_model: Option<String>,
    /// Vector Index assignment; `None` until Phase B runs.
    pub vector_id: Option<u64>,
}

impl CodeChunk {
    /// True iff this chunk is visible to CVW Phase B (has an embedding
    /// but no Vector Index assignment yet).
    #[must_use]
    pub const fn awaiting_vector_assignment(&self) -> bool {
        self.embedding_vector.is_some() && self.vector_id.is_none()
    }

    /// True iff this chunk counts as "vectorized" (spec.md §9: defined
    /// exclusively as `vector_id IS NOT NULL`, never by embedding
    /// presence alone).
    #[must_use]
    pub const fn is_vectorized(&self) -> bool {
        self.vector_id.is_some()
    }
}

#[cfg(test)]
mod code_chunk_tests {
    use super::*;

    fn sample(embedding: Option<Vec<f32>>, vector_id: Option<u64>) -> CodeChunk {
        CodeChunk {
            id: EntityId::new(1).expect("valid entity id"),
            file_id: FileId::new(1).expect("valid file id"),
            owner: Some(EntityRef::Function(EntityId::new(2).expect("valid entity id"))),
            ordinal: 0,
            text: Chunk::new("a docstring chunk").expect("within max"),
            embedding_vector: embedding,
            token_count: Some(4),
            embedding_model: None,
            vector_id,
        }
    }

    #[test]
    fn awaiting_vector_assignment_requires_embedding_without_vector_id() {
        assert!(sample(Some(vec![0.1, 0.2]), None).awaiting_vector_assignment());
        assert!(!sample(None, None).awaiting_vector_assignment());
        assert!(!sample(Some(vec![0.1]), Some(7)).awaiting_vector_assignment());
    }

    #[test]
    fn is_vectorized_requires_vector_id_not_embedding() {
        assert!(sample(None, Some(3)).is_vectorized());
        assert!(!sample(Some(vec![0.1]), None).is_vectorized());
    }
}
