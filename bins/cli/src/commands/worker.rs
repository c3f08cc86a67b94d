//! `worker --role <file-watcher|indexer|vectorizer>` command: run one
//! long-running worker loop (spec.md §4.3-§4.5).
//!
//! Each cycle function in `pyindex-app` returns its own outcome type
//! without persisting a `worker_stats` row — the doc comment on each one
//! says as much — so this loop builds and persists that row itself, the
//! same way `pyindex-infra`'s orchestrator persists `WorkerKind::Orchestrator`
//! rows for its own start/stop/tick events.

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::OutputMode;
use clap::ValueEnum;
use pyindex_domain::{WatchDir, WatchDirId, WorkerKind, WorkerStats};
use pyindex_facade::{
    IndexingWorkerState, VectorizerBreaker, build_chunk_vectorize_deps, build_embedder,
    build_file_watcher_deps, build_indexing_worker_deps, connect_storage, detect_embedding_dimension,
    run_indexing_cycle, run_vectorize_cycle, scan_watch_dir,
};
use pyindex_ports::{SqlValue, StoragePort};
use pyindex_shared::RequestContext;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// `--role` values accepted by the `worker` subcommand, matching
/// spec.md §A.5's `worker --role <file-watcher|indexer|vectorizer>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkerRoleArg {
    /// File Watcher.
    FileWatcher,
    /// Indexing Worker.
    Indexer,
    /// Chunking/Vectorization Worker.
    Vectorizer,
}

impl WorkerRoleArg {
    const fn kind(self) -> WorkerKind {
        match self {
            Self::FileWatcher => WorkerKind::FileWatcher,
            Self::Indexer => WorkerKind::Indexer,
            Self::Vectorizer => WorkerKind::Vectorizer,
        }
    }
}

/// Run the worker loop for `role` until cancelled. Each iteration runs
/// one cycle, persists the resulting [`WorkerStats`] row, and sleeps
/// `short_idle`/`long_idle` depending on whether the cycle touched
/// anything (spec.md §4.4 step 4). `VectorizerConfig` carries no idle
/// fields of its own, so the Chunking/Vectorization Worker reuses
/// `indexer.short_idle`/`long_idle` too.
pub async fn run_worker(mode: OutputMode, role: WorkerRoleArg, config_path: Option<&Path>) -> Result<CliOutput, CliError> {
    let ctx = RequestContext::new_request();
    let config = pyindex_facade::load_effective_config(config_path)?;
    let storage = connect_storage(&config);
    let raw = config.raw();

    let short_idle = Duration::from_millis(raw.indexer.short_idle_ms);
    let long_idle = Duration::from_millis(raw.indexer.long_idle_ms);

    let mut cycle_id: u64 = 0;
    loop {
        ctx.ensure_not_cancelled("worker.loop")?;
        cycle_id += 1;
        let now = unix_seconds_now();

        let stats = match role {
            WorkerRoleArg::FileWatcher => run_file_watcher_cycle(&ctx, &config, &storage, cycle_id, now).await?,
            WorkerRoleArg::Indexer => run_indexer_cycle(&ctx, &config, &storage, cycle_id, now).await?,
            WorkerRoleArg::Vectorizer => run_vectorizer_cycle(&ctx, &config, &storage, cycle_id, now).await?,
        };

        record_worker_stats(&ctx, storage.as_ref(), &stats).await?;

        if !mode.no_progress {
            eprintln!(
                "{} cycle {cycle_id}: scanned={} added={} changed={} deleted={} errors={}",
                role.kind().as_str(),
                stats.scanned,
                stats.added,
                stats.changed,
                stats.deleted,
                stats.errors
            );
        }

        let idle = if stats.touched_any() { short_idle } else { long_idle };
        tokio::time::sleep(idle).await;
    }
}

async fn run_file_watcher_cycle(
    ctx: &RequestContext,
    config: &pyindex_config::ValidatedPyIndexConfig,
    storage: &Arc<dyn StoragePort>,
    cycle_id: u64,
    now: f64,
) -> Result<WorkerStats, CliError> {
    let raw = config.raw();
    let deps = build_file_watcher_deps(config, Arc::clone(storage));
    let ignore_patterns: Vec<Box<str>> = raw.watch.ignore_patterns.iter().map(|pattern| pattern.as_str().into()).collect();

    let mut merged = WorkerStats::start(WorkerKind::FileWatcher, cycle_id, now);
    for entry in &raw.watch.dirs {
        let watch_dir_id = WatchDirId::parse(&entry.id).map_err(pyindex_shared::ErrorEnvelope::from)?;
        let watch_dir = WatchDir::new(watch_dir_id, Some(entry.path.clone()), now, now);
        let stats = scan_watch_dir(ctx, &deps, &watch_dir, &ignore_patterns, cycle_id, now).await?;
        merged.scanned += stats.scanned;
        merged.added += stats.added;
        merged.changed += stats.changed;
        merged.deleted += stats.deleted;
        merged.errors += stats.errors;
    }
    merged.finish(unix_seconds_now());
    Ok(merged)
}

async fn run_indexer_cycle(
    ctx: &RequestContext,
    config: &pyindex_config::ValidatedPyIndexConfig,
    storage: &Arc<dyn StoragePort>,
    cycle_id: u64,
    now: f64,
) -> Result<WorkerStats, CliError> {
    let raw = config.raw();
    let deps = build_indexing_worker_deps(Arc::clone(storage));
    let mut state = IndexingWorkerState::new();

    let outcome = run_indexing_cycle(ctx, &deps, &mut state, raw.indexer.batch_size, raw.indexer.max_failures_per_file, now).await?;

    let mut stats = WorkerStats::start(WorkerKind::Indexer, cycle_id, now);
    stats.scanned = outcome.scanned;
    stats.changed = outcome.changed;
    stats.errors = outcome.errors;
    stats.finish(unix_seconds_now());
    Ok(stats)
}

async fn run_vectorizer_cycle(
    ctx: &RequestContext,
    config: &pyindex_config::ValidatedPyIndexConfig,
    storage: &Arc<dyn StoragePort>,
    cycle_id: u64,
    now: f64,
) -> Result<WorkerStats, CliError> {
    let raw = config.raw();
    let embedder = build_embedder(config)?;
    let dimension = detect_embedding_dimension(ctx, embedder.as_ref()).await?;
    let deps = build_chunk_vectorize_deps(config, Arc::clone(storage), dimension)?;
    let mut breaker = VectorizerBreaker::new();

    let outcome = run_vectorize_cycle(
        ctx,
        &deps,
        &mut breaker,
        raw.vectorizer.chunk_batch,
        raw.vectorizer.faiss_batch,
        raw.vectorizer.min_chunk_length,
        raw.vectorizer.breaker_threshold,
        raw.vectorizer.breaker_cooldown_ms,
        now,
    )
    .await?;

    let mut stats = WorkerStats::start(WorkerKind::Vectorizer, cycle_id, now);
    stats.scanned = outcome.chunked_files;
    stats.changed = outcome.assigned_vectors;
    stats.errors = outcome.errors;
    stats.finish(unix_seconds_now());
    Ok(stats)
}

async fn record_worker_stats(ctx: &RequestContext, storage: &dyn StoragePort, stats: &WorkerStats) -> Result<(), CliError> {
    storage
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

fn unix_seconds_now() -> f64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|duration| duration.as_secs_f64()).unwrap_or(0.0)
}
