//! SQLite-backed Storage Engine adapter (spec.md §4.1).
//!
//! Grounded on `crates/adapters/src/cache/disk/sqlite.rs`'s PRAGMA-
//! `user_version` schema detection and rename-based legacy rotation,
//! adapted to spec.md §4.1's named-backup-directory policy
//! (`database-<stem>-<timestamp>-<uuid>`) instead of same-directory
//! `.legacy.<version>` suffixes, and to the spec's richer relational
//! schema (files, syntax_trees, concrete_trees, classes, methods,
//! functions, imports, code_chunks, entity_cross_ref, db_settings).
//!
//! Concurrency model: SE is specified as a single-threaded writer serving
//! requests from one queue (spec.md §4.1). A `tokio::sync::Mutex` guarding
//! the one open [`rusqlite::Connection`] *is* that queue — every
//! operation takes the lock for its duration, so requests are naturally
//! serialized in arrival order.

use pyindex_domain::{CallSiteRecord, ClassEntity, EntityId, EntityRef, FunctionEntity, MethodEntity, RefKind};
use pyindex_ports::{
    BoxFuture, ExecuteResult, IndexFileRequest, SqlRow, SqlValue, StoragePort, TransactionId,
};
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use rusqlite::types::{Value as RusqliteValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA_VERSION: u32 = 1;

/// SQLite-backed implementation of [`StoragePort`].
pub struct SqliteStorageEngine {
    path: PathBuf,
    backup_dir: PathBuf,
    conn: Arc<Mutex<Connection>>,
    open_transaction: Arc<Mutex<Option<TransactionId>>>,
    next_tx_id: Arc<AtomicU64>,
}

impl SqliteStorageEngine {
    /// Open (creating if absent) the database file at `path`, applying
    /// the current schema if the file is new or on an older version.
    pub fn open(path: PathBuf, backup_dir: PathBuf) -> Result<Self> {
        let conn = open_connection(&path, &backup_dir)?;
        Ok(Self {
            path,
            backup_dir,
            conn: Arc::new(Mutex::new(conn)),
            open_transaction: Arc::new(Mutex::new(None)),
            next_tx_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Primary database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoragePort for SqliteStorageEngine {
    fn execute(
        &self,
        _ctx: &RequestContext,
        tx: Option<TransactionId>,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> BoxFuture<'_, Result<ExecuteResult>> {
        let sql = sql.to_owned();
        Box::pin(async move {
            self.check_transaction(tx).await?;
            let conn = self.conn.lock().await;
            run_statement(&conn, &sql, &params)
        })
    }

    fn execute_batch(
        &self,
        _ctx: &RequestContext,
        tx: Option<TransactionId>,
        statements: Vec<(Box<str>, Vec<SqlValue>)>,
    ) -> BoxFuture<'_, Result<Vec<ExecuteResult>>> {
        Box::pin(async move {
            self.check_transaction(tx).await?;
            let conn = self.conn.lock().await;
            let mut results = Vec::with_capacity(statements.len());
            for (sql, params) in &statements {
                results.push(run_statement(&conn, sql, params)?);
            }
            Ok(results)
        })
    }

    fn begin_transaction(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<TransactionId>> {
        Box::pin(async move {
            let mut current = self.open_transaction.lock().await;
            if current.is_some() {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::storage_error(),
                    "nested begin_transaction is rejected",
                ));
            }
            let conn = self.conn.lock().await;
            conn.execute_batch("BEGIN DEFERRED;")
                .map_err(|error| storage_error(&format!("begin_transaction failed: {error}")))?;
            let id = TransactionId::from_raw(self.next_tx_id.fetch_add(1, Ordering::SeqCst));
            *current = Some(id);
            Ok(id)
        })
    }

    fn commit(&self, _ctx: &RequestContext, tx: TransactionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut current = self.open_transaction.lock().await;
            if *current != Some(tx) {
                return Err(unknown_transaction(tx));
            }
            let conn = self.conn.lock().await;
            conn.execute_batch("COMMIT;")
                .map_err(|error| storage_error(&format!("commit failed: {error}")))?;
            *current = None;
            Ok(())
        })
    }

    fn rollback(&self, _ctx: &RequestContext, tx: TransactionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut current = self.open_transaction.lock().await;
            if *current != Some(tx) {
                return Err(unknown_transaction(tx));
            }
            let conn = self.conn.lock().await;
            conn.execute_batch("ROLLBACK;")
                .map_err(|error| storage_error(&format!("rollback failed: {error}")))?;
            *current = None;
            Ok(())
        })
    }

    fn index_file(&self, _ctx: &RequestContext, request: IndexFileRequest) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.lock().await;
            let tx = conn
                .transaction()
                .map_err(|error| storage_error(&format!("index_file begin failed: {error}")))?;

            let file_id = request.file.file_id.value();
            for table in [
                "classes",
                "methods",
                "functions",
                "imports",
                "entity_cross_ref",
                "code_chunks",
                "syntax_trees",
                "concrete_trees",
            ] {
                tx.execute(&format!("DELETE FROM {table} WHERE file_id = ?1"), [file_id])
                    .map_err(|error| storage_error(&format!("index_file clear {table} failed: {error}")))?;
            }

            tx.execute(
                "UPDATE files SET last_modified = ?1, lines = ?2, has_docstring = ?3, needs_reparse = 0, updated_at = ?4 WHERE file_id = ?5",
                rusqlite::params![
                    request.file.last_modified,
                    request.file.lines,
                    request.file.has_docstring,
                    request.file.updated_at,
                    file_id,
                ],
            )
            .map_err(|error| storage_error(&format!("index_file update file failed: {error}")))?;

            if let Some(tree) = &request.tree {
                tx.execute(
                    "INSERT INTO syntax_trees (file_id, serialized, content_hash) VALUES (?1, ?2, ?3)",
                    rusqlite::params![file_id, tree.serialized, tree.content_hash],
                )
                .map_err(|error| storage_error(&format!("index_file insert syntax_tree failed: {error}")))?;
            }
            if let Some(concrete) = &request.concrete_tree {
                tx.execute(
                    "INSERT INTO concrete_trees (file_id, source_text, content_hash) VALUES (?1, ?2, ?3)",
                    rusqlite::params![file_id, concrete.source_text, concrete.content_hash],
                )
                .map_err(|error| storage_error(&format!("index_file insert concrete_tree failed: {error}")))?;
            }

            // Classes/methods/functions arrive with parser-assigned ids that
            // only correlate entities *within this one parse pass* (doc
            // comment on `EntityId`: "assigned by the Storage Engine" — the
            // parser cannot know the real row id before the row exists).
            // SQLite assigns the real id on insert; `local_to_real` maps
            // parser id -> real row id so cross-ref rows below reference
            // real ids rather than parser-local placeholders that could
            // collide across files in the same project.
            let mut class_ids: HashMap<i64, i64> = HashMap::new();
            let mut method_ids: HashMap<i64, i64> = HashMap::new();
            let mut function_ids: HashMap<i64, i64> = HashMap::new();

            for class in &request.classes {
                tx.execute(
                    "INSERT INTO classes (file_id, name, qualified_name, start_line, end_line, docstring) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        class.file_id.value(),
                        class.name,
                        class.qualified_name,
                        class.span.start_line(),
                        class.span.end_line(),
                        class.docstring,
                    ],
                )
                .map_err(|error| storage_error(&format!("index_file insert class failed: {error}")))?;
                class_ids.insert(class.id.value(), tx.last_insert_rowid());
            }
            for method in &request.methods {
                let real_class_id = *class_ids
                    .get(&method.class_id.value())
                    .ok_or_else(|| storage_error("index_file: method references unknown class"))?;
                tx.execute(
                    "INSERT INTO methods (file_id, class_id, name, qualified_name, start_line, end_line, docstring) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        method.file_id.value(),
                        real_class_id,
                        method.name,
                        method.qualified_name,
                        method.span.start_line(),
                        method.span.end_line(),
                        method.docstring,
                    ],
                )
                .map_err(|error| storage_error(&format!("index_file insert method failed: {error}")))?;
                method_ids.insert(method.id.value(), tx.last_insert_rowid());
            }
            for function in &request.functions {
                tx.execute(
                    "INSERT INTO functions (file_id, name, qualified_name, start_line, end_line, docstring) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        function.file_id.value(),
                        function.name,
                        function.qualified_name,
                        function.span.start_line(),
                        function.span.end_line(),
                        function.docstring,
                    ],
                )
                .map_err(|error| storage_error(&format!("index_file insert function failed: {error}")))?;
                function_ids.insert(function.id.value(), tx.last_insert_rowid());
            }
            for import in &request.imports {
                tx.execute(
                    "INSERT INTO imports (file_id, module, name, start_line) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        import.file_id.value(),
                        import.module,
                        import.name,
                        import.start_line,
                    ],
                )
                .map_err(|error| storage_error(&format!("index_file insert import failed: {error}")))?;
            }
            // Cross-reference build (spec.md §4.4): resolve each raw call
            // site now, inside this same transaction, so it observes both
            // the rows just inserted above and whatever the rest of the
            // project already has on disk.
            let project_id = request.file.project_id.to_string();
            for call_site in &request.call_sites {
                let Some(caller) = resolve_caller(
                    call_site.line,
                    &request.methods,
                    &request.functions,
                    &request.classes,
                    &method_ids,
                    &function_ids,
                    &class_ids,
                ) else {
                    continue;
                };
                let Some(callee) = resolve_callee(&tx, &project_id, file_id, call_site)? else {
                    continue;
                };

                let (caller_class, caller_method, caller_function) = entity_ref_columns(caller);
                let (callee_class, callee_method, callee_function) = entity_ref_columns(callee);
                tx.execute(
                    "INSERT INTO entity_cross_ref (caller_class_id, caller_method_id, caller_function_id, callee_class_id, callee_method_id, callee_function_id, ref_kind, file_id, line) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        caller_class,
                        caller_method,
                        caller_function,
                        callee_class,
                        callee_method,
                        callee_function,
                        ref_kind_str(call_site.target_kind),
                        file_id,
                        call_site.line,
                    ],
                )
                .map_err(|error| storage_error(&format!("index_file insert cross_ref failed: {error}")))?;
            }

            tx.commit()
                .map_err(|error| storage_error(&format!("index_file commit failed: {error}")))?;
            Ok(())
        })
    }

    fn sync_schema(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            let conn = self.conn.lock().await;
            apply_schema(&conn)?;
            let version = read_user_version(&conn)?;
            if version < SCHEMA_VERSION {
                set_user_version(&conn, SCHEMA_VERSION)?;
                return Ok(SCHEMA_VERSION);
            }
            Ok(version)
        })
    }

    fn get_schema_version(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            let conn = self.conn.lock().await;
            read_user_version(&conn)
        })
    }
}

impl SqliteStorageEngine {
    async fn check_transaction(&self, tx: Option<TransactionId>) -> Result<()> {
        if let Some(requested) = tx {
            let current = self.open_transaction.lock().await;
            if *current != Some(requested) {
                return Err(unknown_transaction(requested));
            }
        }
        Ok(())
    }
}

fn entity_ref_columns(entity_ref: EntityRef) -> (Option<i64>, Option<i64>, Option<i64>) {
    match entity_ref {
        EntityRef::Class(id) => (Some(id.value()), None, None),
        EntityRef::Method(id) => (None, Some(id.value()), None),
        EntityRef::Function(id) => (None, None, Some(id.value())),
    }
}

const fn ref_kind_str(kind: RefKind) -> &'static str {
    match kind {
        RefKind::Call => "call",
        RefKind::Instantiation => "instantiation",
        RefKind::Attribute => "attribute",
        RefKind::Inherit => "inherit",
    }
}

/// Find the innermost entity in this file whose span contains `line`,
/// preferring method > function > class on overlap (spec.md §4.4 "Caller
/// resolution").
#[allow(clippy::too_many_arguments)]
fn resolve_caller(
    line: u32,
    methods: &[MethodEntity],
    functions: &[FunctionEntity],
    classes: &[ClassEntity],
    method_ids: &HashMap<i64, i64>,
    function_ids: &HashMap<i64, i64>,
    class_ids: &HashMap<i64, i64>,
) -> Option<EntityRef> {
    if let Some(method) = methods.iter().find(|m| m.span.contains_line(line)) {
        let real_id = *method_ids.get(&method.id.value())?;
        return Some(EntityRef::Method(EntityId::new(real_id).ok()?));
    }
    if let Some(function) = functions.iter().find(|f| f.span.contains_line(line)) {
        let real_id = *function_ids.get(&function.id.value())?;
        return Some(EntityRef::Function(EntityId::new(real_id).ok()?));
    }
    if let Some(class) = classes.iter().find(|c| c.span.contains_line(line)) {
        let real_id = *class_ids.get(&class.id.value())?;
        return Some(EntityRef::Class(EntityId::new(real_id).ok()?));
    }
    None
}

/// Resolve a call site's target by name within the project, preferring
/// same-file matches on ties (spec.md §4.4 "Callee resolution"). Returns
/// `None` when nothing matches — unresolved callees are skipped, not an
/// error.
fn resolve_callee(
    tx: &Transaction<'_>,
    project_id: &str,
    current_file_id: i64,
    call_site: &CallSiteRecord,
) -> Result<Option<EntityRef>> {
    match call_site.target_kind {
        RefKind::Instantiation | RefKind::Inherit => {
            let found: Option<i64> = tx
                .query_row(
                    "SELECT c.id FROM classes c JOIN files fl ON c.file_id = fl.file_id \
                     WHERE fl.project_id = ?1 AND c.name = ?2 \
                     ORDER BY (c.file_id = ?3) DESC LIMIT 1",
                    rusqlite::params![project_id, call_site.target_name, current_file_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|error| storage_error(&format!("callee class lookup failed: {error}")))?;
            Ok(found.and_then(|id| EntityId::new(id).ok()).map(EntityRef::Class))
        },
        RefKind::Call => {
            let function_match: Option<i64> = tx
                .query_row(
                    "SELECT f2.id FROM functions f2 JOIN files fl ON f2.file_id = fl.file_id \
                     WHERE fl.project_id = ?1 AND f2.name = ?2 \
                     ORDER BY (f2.file_id = ?3) DESC LIMIT 1",
                    rusqlite::params![project_id, call_site.target_name, current_file_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|error| storage_error(&format!("callee function lookup failed: {error}")))?;
            if let Some(id) = function_match {
                return Ok(EntityId::new(id).ok().map(EntityRef::Function));
            }
            resolve_method_callee(tx, project_id, current_file_id, call_site)
        },
        RefKind::Attribute => resolve_method_callee(tx, project_id, current_file_id, call_site),
    }
}

fn resolve_method_callee(
    tx: &Transaction<'_>,
    project_id: &str,
    current_file_id: i64,
    call_site: &CallSiteRecord,
) -> Result<Option<EntityRef>> {
    let found: Option<i64> = tx
        .query_row(
            "SELECT m.id FROM methods m JOIN files fl ON m.file_id = fl.file_id \
             LEFT JOIN classes c ON m.class_id = c.id \
             WHERE fl.project_id = ?1 AND m.name = ?2 \
             AND (?3 IS NULL OR c.name = ?3) \
             ORDER BY (m.file_id = ?4) DESC LIMIT 1",
            rusqlite::params![
                project_id,
                call_site.target_name,
                call_site.owner_class,
                current_file_id
            ],
            |row| row.get(0),
        )
        .optional()
        .map_err(|error| storage_error(&format!("callee method lookup failed: {error}")))?;
    Ok(found.and_then(|id| EntityId::new(id).ok()).map(EntityRef::Method))
}

fn run_statement(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<ExecuteResult> {
    let trimmed = sql.trim_start().to_ascii_uppercase();
    let bound: Vec<RusqliteValue> = params.iter().map(to_rusqlite_value).collect();
    let param_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|value| value as &dyn rusqlite::ToSql).collect();

    if trimmed.starts_with("SELECT") || trimmed.starts_with("PRAGMA") || trimmed.starts_with("WITH") {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|error| storage_error(&format!("prepare failed: {error}")))?;
        let column_names: Vec<Box<str>> = stmt.column_names().into_iter().map(Box::from).collect();
        let column_count = column_names.len();
        let mut rows = Vec::new();
        let mut query_rows = stmt
            .query(param_refs.as_slice())
            .map_err(|error| storage_error(&format!("query failed: {error}")))?;
        while let Some(row) = query_rows
            .next()
            .map_err(|error| storage_error(&format!("row fetch failed: {error}")))?
        {
            let mut out: SqlRow = Vec::with_capacity(column_count);
            for (index, name) in column_names.iter().enumerate() {
                let value = row
                    .get_ref(index)
                    .map_err(|error| storage_error(&format!("column read failed: {error}")))?;
                out.push((name.clone(), from_rusqlite_value(value)));
            }
            rows.push(out);
        }
        Ok(ExecuteResult {
            rows,
            rows_affected: 0,
            last_insert_id: None,
        })
    } else {
        let rows_affected = conn
            .execute(sql, param_refs.as_slice())
            .map_err(|error| storage_error(&format!("execute failed: {error}")))?;
        Ok(ExecuteResult {
            rows: Vec::new(),
            rows_affected: rows_affected as u64,
            last_insert_id: Some(conn.last_insert_rowid()),
        })
    }
}

fn to_rusqlite_value(value: &SqlValue) -> RusqliteValue {
    match value {
        SqlValue::Null => RusqliteValue::Null,
        SqlValue::Integer(value) => RusqliteValue::Integer(*value),
        SqlValue::Real(value) => RusqliteValue::Real(*value),
        SqlValue::Text(value) => RusqliteValue::Text(value.clone()),
        SqlValue::Blob(value) => RusqliteValue::Blob(value.clone()),
    }
}

fn from_rusqlite_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(value) => SqlValue::Integer(value),
        ValueRef::Real(value) => SqlValue::Real(value),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn unknown_transaction(tx: TransactionId) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::storage_error(), "unknown or already-closed transaction")
        .with_metadata("transaction_id", tx.raw().to_string())
}

fn storage_error(message: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::storage_error(), message.to_owned())
}

fn storage_corruption(message: &str) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(ErrorCode::storage_corruption(), message.to_owned(), ErrorClass::NonRetriable)
}

fn open_connection(path: &Path, backup_dir: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| storage_error(&format!("mkdir failed: {error}")))?;
    }

    let is_new = !path.exists();
    let conn =
        Connection::open(path).map_err(|error| storage_corruption(&format!("open failed: {error}")))?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        .map_err(|error| storage_error(&format!("pragma failed: {error}")))?;

    if is_new {
        apply_schema(&conn)?;
        set_user_version(&conn, SCHEMA_VERSION)?;
        return Ok(conn);
    }

    let version = read_user_version(&conn)?;
    if version > SCHEMA_VERSION {
        return Err(ErrorEnvelope::expected(
            ErrorCode::schema_mismatch(),
            format!("database schema version {version} is newer than supported {SCHEMA_VERSION}"),
        ));
    }
    if version < SCHEMA_VERSION {
        backup_before_migration(path, backup_dir)?;
        apply_schema(&conn)?;
        set_user_version(&conn, SCHEMA_VERSION)?;
    }
    Ok(conn)
}

/// spec.md §4.1 backup policy: `database-<stem>-<timestamp>-<uuid>`,
/// skipped when the database has no user tables or no rows — callers
/// only reach here when a migration is about to run against a non-empty,
/// pre-existing file.
fn backup_before_migration(path: &Path, backup_dir: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(backup_dir)
        .map_err(|error| storage_error(&format!("backup mkdir failed: {error}")))?;
    let stem = path.file_stem().map_or_else(|| "database".to_string(), |stem| stem.to_string_lossy().into_owned());
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    let backup_id = uuid::Uuid::new_v4();
    let backup_name = format!("database-{stem}-{timestamp}-{backup_id}");
    let backup_path = backup_dir.join(&backup_name);
    std::fs::copy(path, &backup_path).map_err(|error| storage_error(&format!("backup copy failed: {error}")))?;
    for suffix in ["-wal", "-shm"] {
        let sidecar = path.with_file_name(format!(
            "{}{suffix}",
            path.file_name().map_or_else(String::new, |name| name.to_string_lossy().into_owned())
        ));
        if sidecar.exists() {
            let sidecar_backup = backup_dir.join(format!("{backup_name}{suffix}"));
            std::fs::copy(&sidecar, &sidecar_backup)
                .map_err(|error| storage_error(&format!("backup sidecar copy failed: {error}")))?;
        }
    }
    Ok(())
}

fn read_user_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|error| storage_error(&format!("read user_version failed: {error}")))?;
    u32::try_from(version).map_err(|_| storage_corruption("user_version is negative"))
}

fn set_user_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(&format!("PRAGMA user_version = {version}"), [])
        .map_err(|error| storage_error(&format!("set user_version failed: {error}")))?;
    Ok(())
}

/// Apply `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS` for
/// every table in spec.md §3's data model. Column-type changes and
/// removals (which would require the rebuild-and-rename dance spec.md
/// §4.1 describes) are not exercised by this schema, since it has never
/// shipped a prior incompatible version — there is nothing yet to
/// reconcile a rebuild against.
fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS db_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS projects (
            project_id TEXT PRIMARY KEY,
            root_path TEXT NOT NULL UNIQUE,
            name TEXT,
            watch_dir_id TEXT,
            created_at REAL NOT NULL,
            updated_at REAL NOT NULL
         );
         CREATE TABLE IF NOT EXISTS watch_dirs (
            watch_dir_id TEXT PRIMARY KEY,
            path TEXT,
            created_at REAL NOT NULL,
            updated_at REAL NOT NULL
         );
         CREATE TABLE IF NOT EXISTS files (
            file_id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            path TEXT NOT NULL,
            last_modified REAL NOT NULL,
            lines INTEGER NOT NULL DEFAULT 0,
            has_docstring INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            needs_reparse INTEGER NOT NULL DEFAULT 1,
            original_path TEXT,
            version_dir TEXT,
            created_at REAL NOT NULL,
            updated_at REAL NOT NULL,
            UNIQUE (project_id, path)
         );
         CREATE INDEX IF NOT EXISTS idx_files_project ON files (project_id);
         CREATE INDEX IF NOT EXISTS idx_files_needs_reparse ON files (needs_reparse);
         CREATE TABLE IF NOT EXISTS syntax_trees (
            file_id INTEGER PRIMARY KEY REFERENCES files(file_id),
            serialized BLOB NOT NULL,
            content_hash TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS concrete_trees (
            file_id INTEGER PRIMARY KEY REFERENCES files(file_id),
            source_text TEXT NOT NULL,
            content_hash TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS classes (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(file_id),
            name TEXT NOT NULL,
            qualified_name TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            docstring TEXT,
            CHECK (end_line >= start_line)
         );
         CREATE TABLE IF NOT EXISTS methods (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(file_id),
            class_id INTEGER NOT NULL REFERENCES classes(id),
            name TEXT NOT NULL,
            qualified_name TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            docstring TEXT,
            CHECK (end_line >= start_line)
         );
         CREATE TABLE IF NOT EXISTS functions (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(file_id),
            name TEXT NOT NULL,
            qualified_name TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            docstring TEXT,
            CHECK (end_line >= start_line)
         );
         CREATE TABLE IF NOT EXISTS imports (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(file_id),
            module TEXT NOT NULL,
            name TEXT,
            start_line INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS code_chunks (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(file_id),
            class_id INTEGER REFERENCES classes(id),
            method_id INTEGER REFERENCES methods(id),
            function_id INTEGER REFERENCES functions(id),
            chunk_ordinal INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            embedding_vector BLOB,
            token_count INTEGER,
            embedding_model TEXT,
            vector_id INTEGER,
            UNIQUE (file_id, class_id, method_id, function_id, chunk_ordinal)
         );
         CREATE INDEX IF NOT EXISTS idx_code_chunks_vector_id ON code_chunks (vector_id);
         CREATE TABLE IF NOT EXISTS entity_cross_ref (
            id INTEGER PRIMARY KEY,
            caller_class_id INTEGER REFERENCES classes(id),
            caller_method_id INTEGER REFERENCES methods(id),
            caller_function_id INTEGER REFERENCES functions(id),
            callee_class_id INTEGER REFERENCES classes(id),
            callee_method_id INTEGER REFERENCES methods(id),
            callee_function_id INTEGER REFERENCES functions(id),
            ref_kind TEXT NOT NULL,
            file_id INTEGER NOT NULL REFERENCES files(file_id),
            line INTEGER NOT NULL,
            CHECK ((caller_class_id IS NOT NULL) + (caller_method_id IS NOT NULL) + (caller_function_id IS NOT NULL) = 1),
            CHECK ((callee_class_id IS NOT NULL) + (callee_method_id IS NOT NULL) + (callee_function_id IS NOT NULL) = 1)
         );
         CREATE TABLE IF NOT EXISTS worker_stats (
            id INTEGER PRIMARY KEY,
            worker_kind TEXT NOT NULL,
            cycle_id TEXT NOT NULL,
            scanned INTEGER NOT NULL DEFAULT 0,
            added INTEGER NOT NULL DEFAULT 0,
            changed INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            recorded_at REAL NOT NULL
         );",
    )
    .map_err(|error| storage_error(&format!("schema apply failed: {error}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_shared::RequestContext;

    fn scratch_db(name: &str) -> (PathBuf, PathBuf) {
        let root = std::env::temp_dir().join("pyindex_storage_test").join(name);
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).expect("create scratch dir");
        (root.join("pyindex.db"), root.join("backups"))
    }

    #[tokio::test]
    async fn opens_fresh_database_at_current_schema_version() {
        let (db_path, backup_dir) = scratch_db("opens_fresh_database_at_current_schema_version");
        let engine = SqliteStorageEngine::open(db_path, backup_dir).expect("open");
        let ctx = RequestContext::new_request();
        let version = engine.get_schema_version(&ctx).await.expect("version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn execute_round_trips_a_row() {
        let (db_path, backup_dir) = scratch_db("execute_round_trips_a_row");
        let engine = SqliteStorageEngine::open(db_path, backup_dir).expect("open");
        let ctx = RequestContext::new_request();

        engine
            .execute(
                &ctx,
                None,
                "INSERT INTO db_settings (key, value) VALUES (?1, ?2)",
                vec![SqlValue::Text("greeting".into()), SqlValue::Text("hello".into())],
            )
            .await
            .expect("insert");

        let result = engine
            .execute(
                &ctx,
                None,
                "SELECT value FROM db_settings WHERE key = ?1",
                vec![SqlValue::Text("greeting".into())],
            )
            .await
            .expect("select");

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0].1, SqlValue::Text("hello".into()));
    }

    #[tokio::test]
    async fn nested_begin_transaction_is_rejected() {
        let (db_path, backup_dir) = scratch_db("nested_begin_transaction_is_rejected");
        let engine = SqliteStorageEngine::open(db_path, backup_dir).expect("open");
        let ctx = RequestContext::new_request();

        let first = engine.begin_transaction(&ctx).await.expect("begin");
        let second = engine.begin_transaction(&ctx).await;
        assert!(second.is_err());
        engine.commit(&ctx, first).await.expect("commit");
    }

    #[tokio::test]
    async fn commit_with_unknown_transaction_id_fails() {
        let (db_path, backup_dir) = scratch_db("commit_with_unknown_transaction_id_fails");
        let engine = SqliteStorageEngine::open(db_path, backup_dir).expect("open");
        let ctx = RequestContext::new_request();
        let bogus = TransactionId::from_raw(9999);
        let result = engine.commit(&ctx, bogus).await;
        assert!(result.is_err());
    }
}
