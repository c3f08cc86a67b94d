//! Parser boundary contract (spec.md §4.4).
//!
//! Net-new — the teacher has no structural-code-parsing port. Grounded
//! directly on spec.md §4.4's parser contract: given a file's source text,
//! produce a structural tree plus the entities and cross-references IW
//! persists via `StoragePort::index_file`.

use crate::BoxFuture;
use pyindex_domain::{
    CallSiteRecord, ClassEntity, ConcreteTreeRecord, FileId, FunctionEntity, ImportEntity,
    MethodEntity, SyntaxTreeRecord,
};
use pyindex_shared::{RequestContext, Result};

/// Everything IW needs out of one parse pass over a file's source text.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// Serialized structural (concrete) syntax tree.
    pub tree: SyntaxTreeRecord,
    /// Raw source text snapshot, content-hashed alongside `tree`.
    pub concrete_tree: ConcreteTreeRecord,
    /// Top-level and nested classes. `id` fields are parser-local
    /// placeholders that only correlate entities within this one
    /// `ParsedFile` (e.g. a method's `class_id`); the Storage Engine
    /// assigns the real row ids on insert.
    pub classes: Vec<ClassEntity>,
    /// Methods, each owned by a class in `classes`.
    pub methods: Vec<MethodEntity>,
    /// Module-level functions.
    pub functions: Vec<FunctionEntity>,
    /// Import statements.
    pub imports: Vec<ImportEntity>,
    /// Unresolved call/instantiation/attribute/inherit sites discovered
    /// while walking the tree. Resolving these into [`pyindex_domain::EntityCrossRef`]
    /// rows requires looking up entities by name across the project,
    /// which happens inside `StoragePort::index_file`, not here (spec.md
    /// §4.4 "Cross-reference build").
    pub call_sites: Vec<CallSiteRecord>,
    /// True when any class, method, or function in this file has a
    /// non-empty docstring (drives whether CVW has work to do).
    pub has_docstring: bool,
    /// Total line count of the source text.
    pub lines: u32,
}

/// Boundary contract for structural parsing of one file's source text
/// (spec.md §4.4). A single `ParserPort` implementation handles exactly
/// one source language; the Indexing Worker selects it by
/// [`pyindex_domain::Language`].
pub trait ParserPort: Send + Sync {
    /// Parse `source_text` belonging to `file_id` into its structural
    /// entities. Parse failures surface as `ParseError` (spec.md §7) and
    /// leave the file's prior structural rows untouched — IW retries on
    /// the next cycle rather than clearing them.
    fn parse(
        &self,
        ctx: &RequestContext,
        file_id: FileId,
        source_text: &str,
    ) -> BoxFuture<'_, Result<ParsedFile>>;
}
