//! `jobs` command: list the most recent worker cycles recorded in
//! Storage, newest first (spec.md §3 "WorkerStats").

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::OutputMode;
use pyindex_facade::connect_storage;
use pyindex_ports::{SqlRow, SqlValue};
use pyindex_shared::{ErrorCode, ErrorEnvelope, RequestContext};
use std::path::Path;

struct JobRow {
    worker_kind: String,
    cycle_id: i64,
    scanned: i64,
    added: i64,
    changed: i64,
    deleted: i64,
    errors: i64,
    duration_ms: i64,
    recorded_at: f64,
}

/// List the `limit` most recent worker cycles across every worker kind.
pub async fn run_jobs(mode: OutputMode, config_path: Option<&Path>, limit: u32) -> Result<CliOutput, CliError> {
    let ctx = RequestContext::new_request();
    let config = pyindex_facade::load_effective_config(config_path)?;
    let storage = connect_storage(&config);

    let result = storage
        .execute(
            &ctx,
            None,
            "SELECT worker_kind, cycle_id, scanned, added, changed, deleted, errors, duration_ms, recorded_at \
             FROM worker_stats ORDER BY recorded_at DESC LIMIT ?1",
            vec![SqlValue::Integer(i64::from(limit))],
        )
        .await?;

    let mut rows = Vec::with_capacity(result.rows.len());
    for row in result.rows {
        rows.push(job_row_from_columns(row)?);
    }

    Ok(CliOutput { stdout: format_jobs(mode, &rows), stderr: String::new(), exit_code: ExitCode::Ok })
}

fn job_row_from_columns(columns: SqlRow) -> Result<JobRow, CliError> {
    let mut worker_kind = None;
    let mut cycle_id = 0i64;
    let mut scanned = 0i64;
    let mut added = 0i64;
    let mut changed = 0i64;
    let mut deleted = 0i64;
    let mut errors = 0i64;
    let mut duration_ms = 0i64;
    let mut recorded_at = 0.0f64;

    for (name, value) in columns {
        match (&*name, value) {
            ("worker_kind", SqlValue::Text(text)) => worker_kind = Some(text),
            ("cycle_id", SqlValue::Integer(n)) => cycle_id = n,
            ("cycle_id", SqlValue::Text(text)) => cycle_id = text.parse().unwrap_or(0),
            ("scanned", SqlValue::Integer(n)) => scanned = n,
            ("added", SqlValue::Integer(n)) => added = n,
            ("changed", SqlValue::Integer(n)) => changed = n,
            ("deleted", SqlValue::Integer(n)) => deleted = n,
            ("errors", SqlValue::Integer(n)) => errors = n,
            ("duration_ms", SqlValue::Integer(n)) => duration_ms = n,
            ("recorded_at", SqlValue::Real(n)) => recorded_at = n,
            _ => {},
        }
    }

    let worker_kind = worker_kind
        .ok_or_else(|| ErrorEnvelope::invariant(ErrorCode::storage_error(), "worker_stats row missing worker_kind"))?;

    Ok(JobRow { worker_kind, cycle_id, scanned, added, changed, deleted, errors, duration_ms, recorded_at })
}

fn format_jobs(mode: OutputMode, rows: &[JobRow]) -> String {
    if mode.is_ndjson() {
        let mut out = String::new();
        for row in rows {
            let payload = serde_json::json!({
                "type": "job",
                "workerKind": row.worker_kind,
                "cycleId": row.cycle_id,
                "scanned": row.scanned,
                "added": row.added,
                "changed": row.changed,
                "deleted": row.deleted,
                "errors": row.errors,
                "durationMs": row.duration_ms,
                "recordedAt": row.recorded_at,
            });
            out.push_str(&serde_json::to_string(&payload).unwrap_or_default());
            out.push('\n');
        }
        out
    } else if mode.is_json() {
        let payload: Vec<_> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "workerKind": row.worker_kind,
                    "cycleId": row.cycle_id,
                    "scanned": row.scanned,
                    "added": row.added,
                    "changed": row.changed,
                    "deleted": row.deleted,
                    "errors": row.errors,
                    "durationMs": row.duration_ms,
                    "recordedAt": row.recorded_at,
                })
            })
            .collect();
        let mut out = serde_json::to_string_pretty(&payload).unwrap_or_default();
        out.push('\n');
        out
    } else if rows.is_empty() {
        "status: ok\njobs: none recorded yet\n".to_owned()
    } else {
        let mut out = "status: ok\n".to_owned();
        for row in rows {
            out.push_str(&format!(
                "{} cycle={} recorded_at={}: scanned={} added={} changed={} deleted={} errors={} duration_ms={}\n",
                row.worker_kind, row.cycle_id, row.recorded_at, row.scanned, row.added, row.changed, row.deleted, row.errors, row.duration_ms
            ));
        }
        out
    }
}
