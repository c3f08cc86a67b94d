//! # pyindex-domain
//!
//! Domain entities, primitives, and value objects for the code-index core.
//!
//! This crate contains the core domain model with no infrastructure
//! dependencies:
//!
//! - **Primitives** — `ProjectId`, `WatchDirId`, `FileId`, `EntityId`,
//!   `RelativePath`.
//! - **Spans** — `LineSpan`, `Language`.
//! - **Entities** — `Project`, `WatchDir`, `FileRecord`, `SyntaxTreeRecord`,
//!   `ConcreteTreeRecord`, `ClassEntity`, `MethodEntity`, `FunctionEntity`,
//!   `ImportEntity`, `CodeChunk`, `EntityCrossRef`, `DbSetting`,
//!   `WorkerStats`.
//!
//! ## Dependency rules
//!
//! - Depends only on the `shared` crate.
//! - No infrastructure or adapter dependencies.
//! - Pure domain logic with no I/O.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

// Re-export shared types for convenience
pub use pyindex_shared::shared_crate_version;

// =============================================================================
// DOMAIN MODULES
// =============================================================================

pub mod chunk;
pub mod cross_ref;
pub mod entity;
pub mod file;
pub mod primitives;
pub mod project;
pub mod settings;
pub mod spans;
pub mod tree;
pub mod worker_stats;

pub use chunk::{Chunk, ChunkError, CodeChunk, MAX_CHUNK_CHARS};
pub use cross_ref::{CallSiteRecord, EntityCrossRef, EntityRef, RefKind};
pub use entity::{ClassEntity, FunctionEntity, ImportEntity, MethodEntity};
pub use file::{FileRecord, MTIME_EQUALITY_EPSILON, mtime_changed, normalize_to_unix_seconds};
pub use primitives::{EntityId, FileId, PrimitiveError, ProjectId, RelativePath, WatchDirId};
pub use project::{Project, ProjectMarker, WatchDir};
pub use settings::{DbSetting, SCHEMA_VERSION_KEY};
pub use spans::{Language, LineSpan};
pub use tree::{ConcreteTreeRecord, SyntaxTreeRecord};
pub use worker_stats::{WorkerKind, WorkerStats};

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_crate_compiles() {
        let version = domain_crate_version();
        assert!(!version.is_empty());
    }

    #[test]
    fn domain_depends_on_shared() {
        let shared_version = shared_crate_version();
        assert!(!shared_version.is_empty());
    }
}
