//! Indexing Worker use case (spec.md §4.4).
//!
//! Net-new — grounded on `ParserPort`/`StoragePort::index_file` (which
//! owns structural-row replacement and cross-reference resolution in one
//! transaction) and on the teacher's `index_codebase` batching idiom for
//! per-file error isolation within a cycle.

use pyindex_domain::{FileId, FileRecord, Language, ProjectId, RelativePath};
use pyindex_ports::{FileSystemPort, FileSystemPortExt, IndexFileRequest, ParserPort, SqlValue, StoragePort};
use pyindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Collaborators one indexing cycle needs.
pub struct IndexingWorkerDeps {
    /// Storage Engine client.
    pub storage: Arc<dyn StoragePort>,
    /// Read-only filesystem access, used to load each candidate file's
    /// current source text from its project root.
    pub filesystem: Arc<dyn FileSystemPort>,
    /// Structural parser, selected per file by [`Language`] (spec.md §4.4
    /// "one `ParserPort` implementation handles exactly one language").
    pub parsers: HashMap<Language, Arc<dyn ParserPort>>,
}

/// Per-file failure bookkeeping carried between cycles in-process (spec.md
/// §4.4 "`max_failures_per_file` ... reset only by a successful re-parse
/// after a filesystem change"). There is no persisted column for this;
/// FW's `last_modified` bump on change is the signal that resets it.
#[derive(Debug, Default)]
pub struct IndexingWorkerState {
    skipped: HashMap<FileId, SkippedFile>,
}

#[derive(Debug, Clone, Copy)]
struct SkippedFile {
    failures: u32,
    last_modified_at_failure: f64,
}

impl IndexingWorkerState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_skipped(&self, file_id: FileId, last_modified: f64, max_failures_per_file: u32) -> bool {
        self.skipped.get(&file_id).is_some_and(|entry| {
            entry.failures >= max_failures_per_file && (entry.last_modified_at_failure - last_modified).abs() < f64::EPSILON
        })
    }

    fn record_failure(&mut self, file_id: FileId, last_modified: f64) {
        let entry = self.skipped.entry(file_id).or_insert(SkippedFile { failures: 0, last_modified_at_failure: last_modified });
        if (entry.last_modified_at_failure - last_modified).abs() >= f64::EPSILON {
            entry.failures = 0;
            entry.last_modified_at_failure = last_modified;
        }
        entry.failures += 1;
    }

    fn clear(&mut self, file_id: FileId) {
        self.skipped.remove(&file_id);
    }
}

/// Outcome of one indexing cycle, fed into `worker_stats` by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexingCycleOutcome {
    pub scanned: u64,
    pub changed: u64,
    pub errors: u64,
}

/// Run one indexing cycle: select up to `batch_size` files needing
/// reparse across every project with outstanding work, parse each, and
/// persist via `StoragePort::index_file` (spec.md §4.4 steps 1-4).
///
/// Parse errors skip the file and are counted, continuing the cycle.
/// Storage errors abort the cycle immediately so the caller can back off
/// and retry on the next cycle, per spec.md §7's storage-error policy.
pub async fn run_indexing_cycle(
    ctx: &RequestContext,
    deps: &IndexingWorkerDeps,
    state: &mut IndexingWorkerState,
    batch_size: u32,
    max_failures_per_file: u32,
    now: f64,
) -> Result<IndexingCycleOutcome> {
    let mut outcome = IndexingCycleOutcome::default();

    let projects = projects_with_pending_work(ctx, &deps.storage).await?;
    for project_id in projects {
        ctx.ensure_not_cancelled("indexing_worker.cycle")?;
        let root_path = project_root_path(ctx, &deps.storage, project_id).await?;
        let Some(root_path) = root_path else {
            continue;
        };

        let candidates = select_pending_files(ctx, &deps.storage, project_id, batch_size).await?;
        for file in candidates {
            if state.is_skipped(file.file_id, file.last_modified, max_failures_per_file) {
                continue;
            }
            outcome.scanned += 1;

            match index_one_file(ctx, deps, &root_path, &file, now).await {
                Ok(()) => {
                    state.clear(file.file_id);
                    outcome.changed += 1;
                },
                Err(_error) => {
                    state.record_failure(file.file_id, file.last_modified);
                    outcome.errors += 1;
                },
            }
        }
    }

    Ok(outcome)
}

async fn index_one_file(
    ctx: &RequestContext,
    deps: &IndexingWorkerDeps,
    root_path: &PathBuf,
    file: &FileRecord,
    now: f64,
) -> Result<()> {
    let extension = std::path::Path::new(file.path.as_str()).extension().and_then(std::ffi::OsStr::to_str).unwrap_or("");
    let language = Language::from_extension(extension);
    let parser = deps
        .parsers
        .get(&language)
        .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::parse_error(), format!("no parser registered for {language:?}")))?;

    let session = deps.filesystem.session(root_path.clone());
    let source_text = session.read_file_text(ctx, pyindex_ports::SafeRelativePath::new(file.path.as_str())?).await?;

    let parsed = parser.parse(ctx, file.file_id, &source_text).await?;

    let mut updated_file = file.clone();
    updated_file.mark_indexed(parsed.lines, parsed.has_docstring, now);

    let request = IndexFileRequest {
        file: updated_file,
        tree: Some(parsed.tree),
        concrete_tree: Some(parsed.concrete_tree),
        classes: parsed.classes,
        methods: parsed.methods,
        functions: parsed.functions,
        imports: parsed.imports,
        call_sites: parsed.call_sites,
    };

    deps.storage.index_file(ctx, request).await
}

async fn projects_with_pending_work(ctx: &RequestContext, storage: &Arc<dyn StoragePort>) -> Result<Vec<ProjectId>> {
    let result = storage
        .execute(
            ctx,
            None,
            "SELECT DISTINCT project_id FROM files WHERE (deleted = 0 OR deleted IS NULL) AND needs_reparse = 1",
            Vec::new(),
        )
        .await?;

    let mut projects = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let raw = text_column(row, "project_id")?;
        projects.push(ProjectId::parse(&raw).map_err(ErrorEnvelope::from)?);
    }
    Ok(projects)
}

async fn project_root_path(ctx: &RequestContext, storage: &Arc<dyn StoragePort>, project_id: ProjectId) -> Result<Option<PathBuf>> {
    let result = storage
        .execute(ctx, None, "SELECT root_path FROM projects WHERE project_id = ?1", vec![SqlValue::Text(project_id.to_string())])
        .await?;
    Ok(result.rows.first().map(|row| text_column(row, "root_path")).transpose()?.map(PathBuf::from))
}

async fn select_pending_files(
    ctx: &RequestContext,
    storage: &Arc<dyn StoragePort>,
    project_id: ProjectId,
    batch_size: u32,
) -> Result<Vec<FileRecord>> {
    let result = storage
        .execute(
            ctx,
            None,
            "SELECT file_id, project_id, path, last_modified, lines, has_docstring, deleted, needs_reparse, \
             original_path, version_dir, created_at, updated_at FROM files \
             WHERE project_id = ?1 AND (deleted = 0 OR deleted IS NULL) AND needs_reparse = 1 \
             ORDER BY updated_at ASC LIMIT ?2",
            vec![SqlValue::Text(project_id.to_string()), SqlValue::Integer(i64::from(batch_size))],
        )
        .await?;

    let mut files = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        files.push(file_record_from_row(row)?);
    }
    Ok(files)
}

fn file_record_from_row(row: &pyindex_ports::SqlRow) -> Result<FileRecord> {
    let file_id = FileId::new(integer_column(row, "file_id")?).map_err(ErrorEnvelope::from)?;
    let project_id = ProjectId::parse(&text_column(row, "project_id")?).map_err(ErrorEnvelope::from)?;
    let path = RelativePath::parse(&text_column(row, "path")?).map_err(ErrorEnvelope::from)?;
    let original_path = optional_text_column(row, "original_path")
        .map(|raw| RelativePath::parse(&raw).map_err(ErrorEnvelope::from))
        .transpose()?;

    Ok(FileRecord {
        file_id,
        project_id,
        path,
        last_modified: real_column(row, "last_modified")?,
        lines: integer_column(row, "lines")? as u32,
        has_docstring: integer_column(row, "has_docstring")? != 0,
        deleted: integer_column(row, "deleted")? != 0,
        needs_reparse: integer_column(row, "needs_reparse")? != 0,
        original_path,
        version_dir: optional_text_column(row, "version_dir"),
        created_at: real_column(row, "created_at")?,
        updated_at: real_column(row, "updated_at")?,
    })
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

fn optional_text_column(row: &pyindex_ports::SqlRow, name: &str) -> Option<String> {
    row.iter().find(|(column, _)| column.as_ref() == name).and_then(|(_, value)| match value {
        SqlValue::Text(text) => Some(text.clone()),
        _ => None,
    })
}

fn real_column(row: &pyindex_ports::SqlRow, name: &str) -> Result<f64> {
    for (column, value) in row {
        if column.as_ref() == name {
            return match value {
                SqlValue::Real(value) => Ok(*value),
                SqlValue::Integer(value) => Ok(*value as f64),
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

fn missing_column_error(name: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::storage_error(), format!("missing column: {name}"))
}

fn column_type_error(name: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::storage_error(), format!("unexpected column type: {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_adapters::fs::LocalFileSystem;
    use pyindex_adapters::parser::TreeSitterPythonParser;
    use pyindex_adapters::storage::SqliteStorageEngine;
    use std::fs;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pyindex-indexing-worker-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    async fn seed_project_and_file(storage: &Arc<dyn StoragePort>, ctx: &RequestContext, project_root: &PathBuf) -> ProjectId {
        let project_id = ProjectId::generate();
        storage
            .execute(
                ctx,
                None,
                "INSERT INTO projects (project_id, root_path, name, watch_dir_id, created_at, updated_at) \
                 VALUES (?1, ?2, NULL, 'wd', 0, 0)",
                vec![SqlValue::Text(project_id.to_string()), SqlValue::Text(project_root.display().to_string())],
            )
            .await
            .expect("insert project");
        storage
            .execute(
                ctx,
                None,
                "INSERT INTO files (project_id, path, last_modified, lines, has_docstring, deleted, needs_reparse, created_at, updated_at) \
                 VALUES (?1, 'a.py', 1.0, 0, 0, 0, 1, 0, 0)",
                vec![SqlValue::Text(project_id.to_string())],
            )
            .await
            .expect("insert file");
        project_id
    }

    #[tokio::test]
    async fn indexes_a_pending_file_and_clears_needs_reparse() {
        let db_root = scratch("indexes_pending");
        let project_root = scratch("indexes_pending_project");
        fs::write(project_root.join("a.py"), "def f():\n    \"\"\"doc\"\"\"\n    pass\n").expect("write source");

        let storage: Arc<dyn StoragePort> =
            Arc::new(SqliteStorageEngine::open(db_root.join("pyindex.db"), db_root.join("backups")).expect("open storage"));
        let ctx = RequestContext::new_request();
        seed_project_and_file(&storage, &ctx, &project_root).await;

        let mut parsers: HashMap<Language, Arc<dyn ParserPort>> = HashMap::new();
        parsers.insert(Language::Python, Arc::new(TreeSitterPythonParser::new()));
        let deps = IndexingWorkerDeps { storage: storage.clone(), filesystem: Arc::new(LocalFileSystem::new(None)), parsers };
        let mut state = IndexingWorkerState::new();

        let outcome = run_indexing_cycle(&ctx, &deps, &mut state, 50, 5, 2.0).await.expect("cycle succeeds");
        assert_eq!(outcome.scanned, 1);
        assert_eq!(outcome.changed, 1);
        assert_eq!(outcome.errors, 0);

        let rows = storage.execute(&ctx, None, "SELECT needs_reparse FROM files", Vec::new()).await.expect("select");
        assert_eq!(integer_column(&rows.rows[0], "needs_reparse").expect("column"), 0);
    }

    #[tokio::test]
    async fn missing_source_file_is_counted_as_an_error_without_aborting_the_cycle() {
        let db_root = scratch("missing_source");
        let project_root = scratch("missing_source_project");

        let storage: Arc<dyn StoragePort> =
            Arc::new(SqliteStorageEngine::open(db_root.join("pyindex.db"), db_root.join("backups")).expect("open storage"));
        let ctx = RequestContext::new_request();
        seed_project_and_file(&storage, &ctx, &project_root).await;

        let mut parsers: HashMap<Language, Arc<dyn ParserPort>> = HashMap::new();
        parsers.insert(Language::Python, Arc::new(TreeSitterPythonParser::new()));
        let deps = IndexingWorkerDeps { storage, filesystem: Arc::new(LocalFileSystem::new(None)), parsers };
        let mut state = IndexingWorkerState::new();

        let outcome = run_indexing_cycle(&ctx, &deps, &mut state, 50, 5, 2.0).await.expect("cycle succeeds");
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.changed, 0);
    }
}
