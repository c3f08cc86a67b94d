//! `status` command: report the most recent cycle recorded for each
//! worker kind (spec.md §3 "WorkerStats").

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::OutputMode;
use pyindex_facade::connect_storage;
use pyindex_ports::{SqlRow, SqlValue};
use pyindex_shared::{ErrorCode, ErrorEnvelope, RequestContext};
use std::path::Path;

struct WorkerStatusRow {
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

/// Report the latest `worker_stats` row for each of
/// `file_watcher`/`indexer`/`vectorizer`/`orchestrator`.
pub async fn run_status(mode: OutputMode, config_path: Option<&Path>) -> Result<CliOutput, CliError> {
    let ctx = RequestContext::new_request();
    let config = pyindex_facade::load_effective_config(config_path)?;
    let storage = connect_storage(&config);

    let result = storage
        .execute(
            &ctx,
            None,
            "SELECT worker_kind, cycle_id, scanned, added, changed, deleted, errors, duration_ms, MAX(recorded_at) AS recorded_at \
             FROM worker_stats GROUP BY worker_kind ORDER BY worker_kind",
            Vec::new(),
        )
        .await?;

    let mut rows = Vec::with_capacity(result.rows.len());
    for row in result.rows {
        rows.push(status_row_from_columns(row)?);
    }

    Ok(CliOutput { stdout: format_status(mode, &rows), stderr: String::new(), exit_code: ExitCode::Ok })
}

fn status_row_from_columns(columns: SqlRow) -> Result<WorkerStatusRow, CliError> {
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

    Ok(WorkerStatusRow { worker_kind, cycle_id, scanned, added, changed, deleted, errors, duration_ms, recorded_at })
}

fn format_status(mode: OutputMode, rows: &[WorkerStatusRow]) -> String {
    if mode.is_ndjson() {
        let mut out = String::new();
        for row in rows {
            let payload = serde_json::json!({
                "type": "worker_status",
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
        "status: ok\nworkers: none recorded yet\n".to_owned()
    } else {
        let mut out = "status: ok\n".to_owned();
        for row in rows {
            out.push_str(&format!(
                "{}: cycle={} scanned={} added={} changed={} deleted={} errors={} duration_ms={}\n",
                row.worker_kind, row.cycle_id, row.scanned, row.added, row.changed, row.deleted, row.errors, row.duration_ms
            ));
        }
        out
    }
}
