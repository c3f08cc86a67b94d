//! Storage Engine boundary contract (spec.md §4.1).
//!
//! Net-new — the teacher has no relational-storage port; this is grounded
//! directly on spec.md §4.1's operation list and on `pyindex_domain`'s
//! entity shapes for the one domain-aware operation, `index_file`.

use crate::BoxFuture;
use pyindex_domain::{
    CallSiteRecord, ClassEntity, ConcreteTreeRecord, FileRecord, FunctionEntity, ImportEntity,
    MethodEntity, SyntaxTreeRecord,
};
use pyindex_shared::{RequestContext, Result};
use serde::{Deserialize, Serialize};

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Signed integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary blob.
    Blob(Vec<u8>),
}

/// A single result row: column name paired with its value, in column order.
pub type SqlRow = Vec<(Box<str>, SqlValue)>;

/// Outcome of a single `execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteResult {
    /// Rows returned by a `SELECT`; empty for DML statements.
    pub rows: Vec<SqlRow>,
    /// Number of rows a DML statement affected.
    pub rows_affected: u64,
    /// `rowid` of the last inserted row, when applicable.
    pub last_insert_id: Option<i64>,
}

/// Handle to an open transaction, returned by
/// [`StoragePort::begin_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wrap a raw transaction identifier.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Unwrap the raw identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Atomic input to [`StoragePort::index_file`]: everything IW extracted for
/// one file in a single parse pass, applied as one transaction.
///
/// `index_file` owns deletion of this file's prior structural/chunk rows
/// (Open Question decision 4 — FW never deletes them; only `index_file`
/// does, as part of replacing them with the freshly parsed set). It also
/// owns cross-reference *resolution*, not just persistence: `classes`,
/// `methods`, and `functions` carry parser-local placeholder ids (real ids
/// come from the insert), and `call_sites` are unresolved — `index_file`
/// resolves each into an `EntityCrossRef` against the rows it just
/// inserted plus whatever the project already has on disk, all inside one
/// transaction (spec.md §4.4 "Cross-reference build").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFileRequest {
    /// The file row to upsert; its `needs_reparse` flag is cleared as part
    /// of this call.
    pub file: FileRecord,
    /// Serialized structural (concrete) syntax tree, when parsing succeeded.
    pub tree: Option<SyntaxTreeRecord>,
    /// Raw source text snapshot, when parsing succeeded.
    pub concrete_tree: Option<ConcreteTreeRecord>,
    /// Extracted classes.
    pub classes: Vec<ClassEntity>,
    /// Extracted methods.
    pub methods: Vec<MethodEntity>,
    /// Extracted functions.
    pub functions: Vec<FunctionEntity>,
    /// Extracted imports.
    pub imports: Vec<ImportEntity>,
    /// Unresolved call/instantiation/attribute/inherit sites.
    pub call_sites: Vec<CallSiteRecord>,
}

/// Boundary contract for the Storage Engine (spec.md §4.1).
pub trait StoragePort: Send + Sync {
    /// Run one statement, optionally inside an open transaction.
    fn execute(
        &self,
        ctx: &RequestContext,
        tx: Option<TransactionId>,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> BoxFuture<'_, Result<ExecuteResult>>;

    /// Run several statements as one round trip, optionally inside an open
    /// transaction. Statements run in order; the first failure aborts the
    /// remainder.
    fn execute_batch(
        &self,
        ctx: &RequestContext,
        tx: Option<TransactionId>,
        statements: Vec<(Box<str>, Vec<SqlValue>)>,
    ) -> BoxFuture<'_, Result<Vec<ExecuteResult>>>;

    /// Open a new transaction.
    fn begin_transaction(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<TransactionId>>;

    /// Commit an open transaction.
    fn commit(&self, ctx: &RequestContext, tx: TransactionId) -> BoxFuture<'_, Result<()>>;

    /// Roll back an open transaction.
    fn rollback(&self, ctx: &RequestContext, tx: TransactionId) -> BoxFuture<'_, Result<()>>;

    /// Atomically replace one file's structural and chunk rows with a
    /// freshly parsed set, and clear its `needs_reparse` flag.
    fn index_file(&self, ctx: &RequestContext, request: IndexFileRequest) -> BoxFuture<'_, Result<()>>;

    /// Apply pending schema migrations, returning the resulting version.
    fn sync_schema(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u32>>;

    /// Read the current `schema_version` setting.
    fn get_schema_version(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u32>>;
}
