//! File Watcher use case (spec.md §4.3).
//!
//! Net-new — grounded on the teacher's `index_codebase` staged-pipeline
//! idiom (stats collector, per-file error isolation) adapted to a single
//! scan cycle over one watch root, and on `pyindex_domain::file`'s
//! Julian-day-aware timestamp normalization and `mtime_changed` threshold.

use pyindex_domain::{
    FileId, Project, ProjectId, ProjectMarker, RelativePath, WatchDir, WatchDirId, WorkerKind,
    WorkerStats, mtime_changed, normalize_to_unix_seconds,
};
use pyindex_ports::{
    FileSystemEntryKind, FileSystemPort, FileSystemPortExt, IgnoreMatchInput, IgnorePort,
    LockPort, PathPolicyPort, SafeRelativePath, SqlValue, StoragePort,
};
use pyindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Collaborators a scan cycle needs (spec.md §4.3 steps 1-9).
pub struct FileWatcherDeps {
    /// Storage Engine client.
    pub storage: Arc<dyn StoragePort>,
    /// Read-only filesystem access.
    pub filesystem: Arc<dyn FileSystemPort>,
    /// Untrusted-path normalization.
    pub path_policy: Arc<dyn PathPolicyPort>,
    /// Ignore-pattern matcher.
    pub ignore: Arc<dyn IgnorePort>,
    /// Per-root exclusive lock (`<watch_root>/.file_watcher.lock`).
    pub lock: Arc<dyn LockPort>,
}

/// One discovered on-disk entry, prior to reconciliation against Storage.
struct DiscoveredFile {
    relative_path: RelativePath,
    mtime_unix: f64,
}

/// Scan every project under `watch_dir`, reconciling the filesystem
/// against Storage's `files` table (spec.md §4.3). Returns one
/// [`WorkerStats`] row summarizing scanned/added/changed/deleted/errors
/// across every project found under this root.
///
/// A lock/IO/storage error for the whole root is logged into `errors` and
/// ends the cycle early (the watch dir's lock could not be acquired, or
/// the root no longer resolves on disk); a per-file or per-project error
/// is counted and the scan continues with the next file/project.
pub async fn scan_watch_dir(
    ctx: &RequestContext,
    deps: &FileWatcherDeps,
    watch_dir: &WatchDir,
    ignore_patterns: &[Box<str>],
    cycle_id: u64,
    now: f64,
) -> Result<WorkerStats> {
    let mut stats = WorkerStats::start(WorkerKind::FileWatcher, cycle_id, now);

    let Some(root_path) = watch_dir.root_path.clone() else {
        return Ok(stats);
    };
    if !watch_dir.is_present_on_disk() {
        return Ok(stats);
    }

    let Some(guard) = deps.lock.try_acquire(ctx, watch_dir.id.as_str()).await? else {
        stats.errors += 1;
        stats.finish(now);
        return Ok(stats);
    };

    let result = scan_projects_under_root(ctx, deps, &root_path, &watch_dir.id, ignore_patterns, &mut stats, now).await;
    guard.release().await?;
    result?;

    stats.finish(now);
    Ok(stats)
}

async fn scan_projects_under_root(
    ctx: &RequestContext,
    deps: &FileWatcherDeps,
    root_path: &PathBuf,
    watch_dir_id: &WatchDirId,
    ignore_patterns: &[Box<str>],
    stats: &mut WorkerStats,
    now: f64,
) -> Result<()> {
    let root_session = deps.filesystem.session(root_path.clone());
    let top_level = root_session.read_dir(ctx, SafeRelativePath::new(".")?).await?;

    for entry in top_level {
        ctx.ensure_not_cancelled("file_watcher.scan")?;
        if entry.kind != FileSystemEntryKind::Directory {
            continue;
        }

        let marker_path = match deps.path_policy.to_safe_relative_path(&format!("{}/projectid", entry.name)) {
            Ok(path) => path,
            Err(_) => continue,
        };
        let marker_text = match root_session.read_file_text(ctx, marker_path).await {
            Ok(text) => text,
            Err(_) => continue,
        };
        let marker = match ProjectMarker::parse(&marker_text) {
            Ok(marker) => marker,
            Err(_) => {
                stats.errors += 1;
                continue;
            },
        };

        let project_root = root_path.join(&*entry.name);
        if let Err(_error) = scan_one_project(ctx, deps, &marker, &project_root, watch_dir_id, ignore_patterns, stats, now).await {
            stats.errors += 1;
        }
    }

    Ok(())
}

async fn scan_one_project(
    ctx: &RequestContext,
    deps: &FileWatcherDeps,
    marker: &ProjectMarker,
    project_root: &PathBuf,
    watch_dir_id: &WatchDirId,
    ignore_patterns: &[Box<str>],
    stats: &mut WorkerStats,
    now: f64,
) -> Result<()> {
    let project = ensure_project(ctx, deps, marker, project_root, watch_dir_id, now).await?;

    let discovered = discover_files(ctx, deps, project_root, ignore_patterns).await?;
    let known = load_known_files(ctx, deps, project.project_id).await?;

    let mut seen_paths = std::collections::HashSet::new();
    for file in &discovered {
        stats.scanned += 1;
        seen_paths.insert(file.relative_path.as_str().to_owned());

        match known.iter().find(|row| row.path == file.relative_path.as_str()) {
            None => {
                insert_new_file(ctx, deps, project.project_id, &file.relative_path, file.mtime_unix, now).await?;
                stats.added += 1;
            },
            Some(existing) if existing.deleted => {
                reinstate_file(ctx, deps, existing.file_id, file.mtime_unix, now).await?;
                stats.changed += 1;
            },
            Some(existing) if mtime_changed(file.mtime_unix, existing.last_modified) => {
                update_changed_file(ctx, deps, existing.file_id, file.mtime_unix, now).await?;
                stats.changed += 1;
            },
            Some(_) => {},
        }
    }

    for row in &known {
        if row.deleted || seen_paths.contains(&row.path) {
            continue;
        }
        mark_file_deleted(ctx, deps, row.file_id, now).await?;
        stats.deleted += 1;
    }

    Ok(())
}

async fn ensure_project(
    ctx: &RequestContext,
    deps: &FileWatcherDeps,
    marker: &ProjectMarker,
    project_root: &PathBuf,
    watch_dir_id: &WatchDirId,
    now: f64,
) -> Result<Project> {
    let result = deps
        .storage
        .execute(
            ctx,
            None,
            "SELECT project_id, root_path, name, watch_dir_id, created_at, updated_at FROM projects WHERE project_id = ?1",
            vec![SqlValue::Text(marker.id.to_string())],
        )
        .await?;

    if let Some(row) = result.rows.first() {
        let root_path = text_column(row, "root_path")?;
        let name = optional_text_column(row, "name");
        let created_at = real_column(row, "created_at")?;
        let updated_at = real_column(row, "updated_at")?;
        return Ok(Project::new(marker.id, PathBuf::from(root_path), name, watch_dir_id.clone(), created_at, updated_at));
    }

    let project = Project::new(marker.id, project_root.clone(), marker.description.clone(), watch_dir_id.clone(), now, now);
    deps.storage
        .execute(
            ctx,
            None,
            "INSERT INTO projects (project_id, root_path, name, watch_dir_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            vec![
                SqlValue::Text(project.project_id.to_string()),
                SqlValue::Text(project.root_path.display().to_string()),
                project.name.clone().map_or(SqlValue::Null, SqlValue::Text),
                SqlValue::Text(project.watch_dir_id.as_str().to_owned()),
                SqlValue::Real(project.created_at),
                SqlValue::Real(project.updated_at),
            ],
        )
        .await?;
    Ok(project)
}

async fn discover_files(
    ctx: &RequestContext,
    deps: &FileWatcherDeps,
    project_root: &PathBuf,
    ignore_patterns: &[Box<str>],
) -> Result<Vec<DiscoveredFile>> {
    let session = deps.filesystem.session(project_root.clone());
    let mut out = Vec::new();
    let mut stack = vec![SafeRelativePath::new(".")?];

    while let Some(dir) = stack.pop() {
        ctx.ensure_not_cancelled("file_watcher.discover")?;
        let entries = match session.read_dir(ctx, dir.clone()).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        for entry in entries {
            let relative = if dir.as_str() == "." {
                entry.name.to_string()
            } else {
                format!("{}/{}", dir.as_str(), entry.name)
            };

            let matched = deps.ignore.is_ignored(&IgnoreMatchInput {
                ignore_patterns: ignore_patterns.to_vec(),
                relative_path: relative.clone().into_boxed_str(),
            });
            if matched {
                continue;
            }

            let Ok(safe) = deps.path_policy.to_safe_relative_path(&relative) else {
                continue;
            };

            match entry.kind {
                FileSystemEntryKind::Directory => stack.push(safe),
                FileSystemEntryKind::File => {
                    let Ok(stat) = session.stat(ctx, safe).await else {
                        continue;
                    };
                    let Ok(relative_path) = RelativePath::parse(&relative) else {
                        continue;
                    };
                    let mtime_unix = normalize_to_unix_seconds(stat.mtime_ms as f64 / 1000.0);
                    out.push(DiscoveredFile { relative_path, mtime_unix });
                },
                FileSystemEntryKind::Other => {},
            }
        }
    }

    Ok(out)
}

struct KnownFileRow {
    file_id: FileId,
    path: String,
    last_modified: f64,
    deleted: bool,
}

async fn load_known_files(ctx: &RequestContext, deps: &FileWatcherDeps, project_id: ProjectId) -> Result<Vec<KnownFileRow>> {
    let result = deps
        .storage
        .execute(
            ctx,
            None,
            "SELECT file_id, path, last_modified, deleted FROM files WHERE project_id = ?1",
            vec![SqlValue::Text(project_id.to_string())],
        )
        .await?;

    let mut rows = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let file_id = FileId::new(integer_column(row, "file_id")?).map_err(ErrorEnvelope::from)?;
        let path = text_column(row, "path")?;
        let last_modified = normalize_to_unix_seconds(real_column(row, "last_modified")?);
        let deleted = integer_column(row, "deleted")? != 0;
        rows.push(KnownFileRow { file_id, path, last_modified, deleted });
    }
    Ok(rows)
}

async fn insert_new_file(
    ctx: &RequestContext,
    deps: &FileWatcherDeps,
    project_id: ProjectId,
    path: &RelativePath,
    mtime_unix: f64,
    now: f64,
) -> Result<()> {
    deps.storage
        .execute(
            ctx,
            None,
            "INSERT INTO files (project_id, path, last_modified, lines, has_docstring, deleted, needs_reparse, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, 0, 0, 1, ?4, ?4)",
            vec![
                SqlValue::Text(project_id.to_string()),
                SqlValue::Text(path.as_str().to_owned()),
                SqlValue::Real(mtime_unix),
                SqlValue::Real(now),
            ],
        )
        .await?;
    Ok(())
}

async fn update_changed_file(ctx: &RequestContext, deps: &FileWatcherDeps, file_id: FileId, mtime_unix: f64, now: f64) -> Result<()> {
    deps.storage
        .execute(
            ctx,
            None,
            "UPDATE files SET last_modified = ?1, needs_reparse = 1, updated_at = ?2 WHERE file_id = ?3",
            vec![SqlValue::Real(mtime_unix), SqlValue::Real(now), SqlValue::Integer(file_id.value())],
        )
        .await?;
    Ok(())
}

async fn reinstate_file(ctx: &RequestContext, deps: &FileWatcherDeps, file_id: FileId, mtime_unix: f64, now: f64) -> Result<()> {
    deps.storage
        .execute(
            ctx,
            None,
            "UPDATE files SET last_modified = ?1, needs_reparse = 1, deleted = 0, updated_at = ?2 WHERE file_id = ?3",
            vec![SqlValue::Real(mtime_unix), SqlValue::Real(now), SqlValue::Integer(file_id.value())],
        )
        .await?;
    Ok(())
}

async fn mark_file_deleted(ctx: &RequestContext, deps: &FileWatcherDeps, file_id: FileId, now: f64) -> Result<()> {
    deps.storage
        .execute(
            ctx,
            None,
            "UPDATE files SET deleted = 1, updated_at = ?1 WHERE file_id = ?2",
            vec![SqlValue::Real(now), SqlValue::Integer(file_id.value())],
        )
        .await?;
    Ok(())
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
    use pyindex_adapters::fs::{LocalFileSystem, LocalPathPolicy};
    use pyindex_adapters::ignore::IgnoreMatcher;
    use pyindex_adapters::lock::FileLockPort;
    use pyindex_adapters::storage::SqliteStorageEngine;
    use std::fs;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pyindex-file-watcher-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    fn deps(lock_dir: PathBuf, storage: Arc<dyn StoragePort>) -> FileWatcherDeps {
        FileWatcherDeps {
            storage,
            filesystem: Arc::new(LocalFileSystem::new(None)),
            path_policy: Arc::new(LocalPathPolicy::new()),
            ignore: Arc::new(IgnoreMatcher::new()),
            lock: Arc::new(FileLockPort::new(lock_dir, "file_watcher")),
        }
    }

    #[tokio::test]
    async fn first_cycle_discovers_a_new_project_and_inserts_all_its_files() {
        let root = scratch("discovers_project");
        let project_dir = root.join("proj");
        fs::create_dir_all(&project_dir).expect("create project dir");
        fs::write(project_dir.join("projectid"), "3fa85f64-5717-4562-b3fc-2c963f66afa6").expect("write marker");
        fs::write(project_dir.join("a.py"), "def f(): pass").expect("write file");

        let db_root = scratch("discovers_project_db");
        let storage: Arc<dyn StoragePort> =
            Arc::new(SqliteStorageEngine::open(db_root.join("pyindex.db"), db_root.join("backups")).expect("open storage"));
        let ctx = RequestContext::new_request();

        let watch_dir = WatchDir::new(WatchDirId::parse("root-1").expect("valid id"), Some(root.clone()), 0.0, 0.0);
        let deps = deps(scratch("discovers_project_locks"), storage);

        let stats = scan_watch_dir(&ctx, &deps, &watch_dir, &[], 1, 1_700_000_000.0).await.expect("scan succeeds");
        assert_eq!(stats.added, 1);
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.deleted, 0);
    }

    #[tokio::test]
    async fn second_cycle_with_no_changes_reports_no_delta() {
        let root = scratch("no_changes");
        let project_dir = root.join("proj");
        fs::create_dir_all(&project_dir).expect("create project dir");
        fs::write(project_dir.join("projectid"), "3fa85f64-5717-4562-b3fc-2c963f66afa6").expect("write marker");
        fs::write(project_dir.join("a.py"), "def f(): pass").expect("write file");

        let db_root = scratch("no_changes_db");
        let storage: Arc<dyn StoragePort> =
            Arc::new(SqliteStorageEngine::open(db_root.join("pyindex.db"), db_root.join("backups")).expect("open storage"));
        let ctx = RequestContext::new_request();
        let watch_dir = WatchDir::new(WatchDirId::parse("root-1").expect("valid id"), Some(root.clone()), 0.0, 0.0);
        let deps = deps(scratch("no_changes_locks"), storage);

        let first = scan_watch_dir(&ctx, &deps, &watch_dir, &[], 1, 1_700_000_000.0).await.expect("first scan");
        assert_eq!(first.added, 1);

        let second = scan_watch_dir(&ctx, &deps, &watch_dir, &[], 2, 1_700_000_001.0).await.expect("second scan");
        assert_eq!(second.added, 0);
        assert_eq!(second.changed, 0);
        assert_eq!(second.deleted, 0);
    }

    #[tokio::test]
    async fn file_removed_from_disk_is_marked_deleted_not_removed() {
        let root = scratch("file_removed");
        let project_dir = root.join("proj");
        fs::create_dir_all(&project_dir).expect("create project dir");
        fs::write(project_dir.join("projectid"), "3fa85f64-5717-4562-b3fc-2c963f66afa6").expect("write marker");
        fs::write(project_dir.join("a.py"), "def f(): pass").expect("write file");

        let db_root = scratch("file_removed_db");
        let storage: Arc<dyn StoragePort> =
            Arc::new(SqliteStorageEngine::open(db_root.join("pyindex.db"), db_root.join("backups")).expect("open storage"));
        let ctx = RequestContext::new_request();
        let watch_dir = WatchDir::new(WatchDirId::parse("root-1").expect("valid id"), Some(root.clone()), 0.0, 0.0);
        let deps = deps(scratch("file_removed_locks"), storage);

        scan_watch_dir(&ctx, &deps, &watch_dir, &[], 1, 1_700_000_000.0).await.expect("first scan");
        fs::remove_file(project_dir.join("a.py")).expect("remove file");

        let second = scan_watch_dir(&ctx, &deps, &watch_dir, &[], 2, 1_700_000_001.0).await.expect("second scan");
        assert_eq!(second.deleted, 1);
    }
}
