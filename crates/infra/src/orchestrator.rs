//! Worker Orchestrator (spec.md §4.6).
//!
//! Net-new — the teacher ships no multi-process supervision; grounded on
//! `pyindex_app`'s externally-driven-cycle pattern (`run_indexing_cycle`,
//! `run_vectorize_cycle`): `tick` runs one supervision pass and returns a
//! `WorkerStats` row for the caller to persist and loop on, rather than
//! blocking forever itself.

use crate::supervisor::{BackoffPolicy, SupervisedWorker, WorkerGroup};
use pyindex_config::{OrchestratorConfig, WorkersConfig};
use pyindex_domain::{WorkerKind, WorkerStats};
use pyindex_ports::{ProcessPort, ProcessStatus, SpawnProcessRequest, SqlValue, StoragePort};
use pyindex_shared::{RequestContext, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators the orchestrator needs.
pub struct OrchestratorDeps {
    /// Storage Engine client, used to record start/stop events as
    /// `worker_stats` rows under `WorkerKind::Orchestrator`.
    pub storage: Arc<dyn StoragePort>,
    /// Process-supervision boundary.
    pub process: Arc<dyn ProcessPort>,
}

/// The three worker roles the orchestrator can supervise, matching
/// `workers.*_enabled` config keys and the CLI's `worker --role` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// File Watcher.
    FileWatcher,
    /// Indexing Worker.
    Indexer,
    /// Chunking/Vectorization Worker.
    Vectorizer,
}

impl WorkerRole {
    const fn cli_role_arg(self) -> &'static str {
        match self {
            Self::FileWatcher => "file-watcher",
            Self::Indexer => "indexer",
            Self::Vectorizer => "vectorizer",
        }
    }

    /// The `WorkerKind` a worker process started for this role should use
    /// when recording its own cycle stats.
    #[must_use]
    pub const fn as_kind(self) -> WorkerKind {
        match self {
            Self::FileWatcher => WorkerKind::FileWatcher,
            Self::Indexer => WorkerKind::Indexer,
            Self::Vectorizer => WorkerKind::Vectorizer,
        }
    }
}

/// Build the worker group for the enabled roles in `workers`, invoking
/// `worker_binary` with `worker --role <role> --config <config_path>` and
/// logging each worker's stdout/stderr under `orchestrator.run_dir/logs`.
pub fn build_worker_group(
    worker_binary: &Path,
    config_path: Option<&Path>,
    orchestrator: &OrchestratorConfig,
    workers: &WorkersConfig,
) -> WorkerGroup {
    let backoff = BackoffPolicy::new(orchestrator.max_backoff_ms);
    let log_dir = orchestrator.run_dir.join("logs");

    let roles: [(WorkerRole, bool); 3] = [
        (WorkerRole::FileWatcher, workers.file_watcher_enabled),
        (WorkerRole::Indexer, workers.indexer_enabled),
        (WorkerRole::Vectorizer, workers.vectorizer_enabled),
    ];

    let mut supervised = Vec::with_capacity(roles.len());
    for (role, enabled) in roles {
        if !enabled {
            continue;
        }
        let name = role.cli_role_arg();
        let mut args = vec!["worker".to_owned(), "--role".to_owned(), name.to_owned()];
        if let Some(config_path) = config_path {
            args.push("--config".to_owned());
            args.push(config_path.display().to_string());
        }
        let request = SpawnProcessRequest {
            program: worker_binary.display().to_string(),
            args,
            working_dir: Some(orchestrator.run_dir.clone()),
            stdout_log_path: Some(log_dir.join(format!("{name}.out.log"))),
            stderr_log_path: Some(log_dir.join(format!("{name}.err.log"))),
        };
        supervised.push(SupervisedWorker::new(name, request, backoff));
    }

    WorkerGroup::new(supervised)
}

/// Start every configured worker and record a `WorkerKind::Orchestrator`
/// start event.
pub async fn start_orchestrator(ctx: &RequestContext, deps: &OrchestratorDeps, group: &mut WorkerGroup, cycle_id: u64, now: f64) -> Result<()> {
    group.start_all(ctx, &deps.process).await?;
    let mut stats = WorkerStats::start(WorkerKind::Orchestrator, cycle_id, now);
    stats.added = group_running_count(group) as u64;
    stats.finish(now);
    record_worker_stats(ctx, deps, &stats).await
}

/// Stop every configured worker, waiting up to `orchestrator.shutdown_timeout`
/// before force-killing stragglers, and record a stop event.
pub async fn stop_orchestrator(ctx: &RequestContext, deps: &OrchestratorDeps, group: &mut WorkerGroup, shutdown_timeout: Duration, cycle_id: u64, now: f64) -> Result<()> {
    let outcome = group.stop_all(ctx, &deps.process, shutdown_timeout).await;
    let mut stats = WorkerStats::start(WorkerKind::Orchestrator, cycle_id, now);
    stats.deleted = group_running_count(group) as u64;
    if outcome.is_err() {
        stats.errors = 1;
    }
    stats.finish(now);
    record_worker_stats(ctx, deps, &stats).await?;
    outcome
}

/// Run one supervision pass: poll every worker, restart any that exited
/// and are past their backoff window, and report what happened.
pub async fn tick(ctx: &RequestContext, deps: &OrchestratorDeps, group: &mut WorkerGroup, cycle_id: u64, now: f64) -> Result<WorkerStats> {
    let mut stats = WorkerStats::start(WorkerKind::Orchestrator, cycle_id, now);

    for worker in group.iter_mut() {
        stats.scanned += 1;
        if let Some(status) = worker.poll(ctx, deps.process.as_ref()).await? {
            stats.errors += u64::from(!matches!(status, ProcessStatus::Exited(0)));
            worker.record_exit_and_schedule_restart(now);
        }
        if !worker.is_running() && worker.ready_to_restart(now) {
            worker.ensure_started(ctx, deps.process.as_ref()).await?;
            stats.changed += 1;
        }
        if worker.is_running() {
            worker.reset_backoff();
        }
    }

    stats.finish(now);
    record_worker_stats(ctx, deps, &stats).await?;
    Ok(stats)
}

fn group_running_count(group: &mut WorkerGroup) -> usize {
    group.iter_mut().filter(|worker| worker.is_running()).count()
}

async fn record_worker_stats(ctx: &RequestContext, deps: &OrchestratorDeps, stats: &WorkerStats) -> Result<()> {
    deps.storage
        .execute(
            ctx,
            None,
            "INSERT INTO worker_stats (worker_kind, cycle_id, scanned, added, changed, deleted, errors, duration_ms, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            vec![
                SqlValue::Text(stats.kind.as_str().to_owned()),
                SqlValue::Text(stats.cycle_id.to_string()),
                SqlValue::Integer(i64::try_from(stats.scanned).unwrap_or(i64::MAX)),
                SqlValue::Integer(i64::try_from(stats.added).unwrap_or(i64::MAX)),
                SqlValue::Integer(i64::try_from(stats.changed).unwrap_or(i64::MAX)),
                SqlValue::Integer(i64::try_from(stats.deleted).unwrap_or(i64::MAX)),
                SqlValue::Integer(i64::try_from(stats.errors).unwrap_or(i64::MAX)),
                SqlValue::Integer((stats.duration_seconds * 1000.0) as i64),
                SqlValue::Real(stats.started_at),
            ],
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_adapters::process::OsProcessSupervisor;
    use pyindex_adapters::storage::SqliteStorageEngine;
    use pyindex_config::{OrchestratorConfig, WorkersConfig};
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join("pyindex_orchestrator_test").join(name);
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("logs")).expect("create scratch dir");
        root
    }

    fn deps(run_dir: &Path) -> OrchestratorDeps {
        let engine = SqliteStorageEngine::open(run_dir.join("pyindex.db"), run_dir.join("backups")).expect("open storage");
        OrchestratorDeps { storage: Arc::new(engine), process: Arc::new(OsProcessSupervisor::new()) }
    }

    fn long_running_group() -> WorkerGroup {
        let request = SpawnProcessRequest {
            program: "sleep".to_owned(),
            args: vec!["30".to_owned()],
            working_dir: None,
            stdout_log_path: None,
            stderr_log_path: None,
        };
        WorkerGroup::new(vec![SupervisedWorker::new("file-watcher", request, BackoffPolicy::new(5_000))])
    }

    fn short_lived_group() -> WorkerGroup {
        let request = SpawnProcessRequest { program: "true".to_owned(), args: Vec::new(), working_dir: None, stdout_log_path: None, stderr_log_path: None };
        WorkerGroup::new(vec![SupervisedWorker::new("file-watcher", request, BackoffPolicy::new(5_000))])
    }

    #[test]
    fn build_worker_group_includes_only_enabled_roles() {
        let orchestrator_config = OrchestratorConfig { run_dir: PathBuf::from("/tmp/pyindex-run"), shutdown_timeout_ms: 2_000, max_backoff_ms: 5_000 };
        let workers = WorkersConfig { file_watcher_enabled: true, indexer_enabled: false, vectorizer_enabled: true };
        let mut group = build_worker_group(Path::new("/usr/bin/pyindex"), Some(Path::new("/etc/pyindex.toml")), &orchestrator_config, &workers);

        let names: Vec<&str> = group.iter_mut().map(|worker| worker.name()).collect();
        assert_eq!(names, vec!["file-watcher", "vectorizer"]);
    }

    #[tokio::test]
    async fn starts_only_enabled_workers_and_records_a_stats_row() {
        let run_dir = scratch_dir("starts_only_enabled_workers_and_records_a_stats_row");
        let ctx = RequestContext::new_request();
        let deps = deps(&run_dir);
        let mut group = long_running_group();

        start_orchestrator(&ctx, &deps, &mut group, 1, 1_700_000_000.0).await.expect("start");
        assert_eq!(group_running_count(&mut group), 1);

        stop_orchestrator(&ctx, &deps, &mut group, Duration::from_millis(500), 2, 1_700_000_001.0)
            .await
            .expect("stop");
        assert_eq!(group_running_count(&mut group), 0);
    }

    #[tokio::test]
    async fn tick_restarts_a_worker_that_exited() {
        let run_dir = scratch_dir("tick_restarts_a_worker_that_exited");
        let ctx = RequestContext::new_request();
        let deps = deps(&run_dir);
        // "true" exits immediately, so the first tick should observe the exit
        // and restart it within the same cycle (zero-length initial backoff).
        let mut group = short_lived_group();

        start_orchestrator(&ctx, &deps, &mut group, 1, 1_700_000_000.0).await.expect("start");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = tick(&ctx, &deps, &mut group, 2, 1_700_000_000.0).await.expect("tick");
        assert_eq!(stats.changed, 1);

        stop_orchestrator(&ctx, &deps, &mut group, Duration::from_millis(500), 3, 1_700_000_001.0)
            .await
            .expect("stop");
    }
}
