//! `orchestrate` command: supervise the configured worker processes
//! until killed (spec.md §4.6).

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::OutputMode;
use pyindex_facade::{build_orchestrator_deps, build_worker_group, connect_storage, start_orchestrator, stop_orchestrator, tick};
use pyindex_shared::RequestContext;
use std::path::Path;
use std::time::Duration;

/// Start every worker role enabled in `workers.*`, then poll and restart
/// them forever, stopping cleanly on cancellation.
pub async fn run_orchestrate(mode: OutputMode, config_path: Option<&Path>) -> Result<CliOutput, CliError> {
    let ctx = RequestContext::new_request();
    let config = pyindex_facade::load_effective_config(config_path)?;
    let raw = config.raw();

    let storage = connect_storage(&config);
    let deps = build_orchestrator_deps(storage);
    let worker_binary = std::env::current_exe()?;
    let mut group = build_worker_group(&worker_binary, config_path, &raw.orchestrator, &raw.workers);

    let mut cycle_id: u64 = 0;
    let now = unix_seconds_now();
    start_orchestrator(&ctx, &deps, &mut group, cycle_id, now).await?;
    if !mode.no_progress {
        eprintln!("orchestrator: started workers under {}", raw.orchestrator.run_dir.display());
    }

    loop {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(1)) => {
                cycle_id += 1;
                let stats = tick(&ctx, &deps, &mut group, cycle_id, unix_seconds_now()).await?;
                if !mode.no_progress && stats.changed > 0 {
                    eprintln!("orchestrator: restarted {} worker(s)", stats.changed);
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let shutdown_timeout = Duration::from_millis(raw.orchestrator.shutdown_timeout_ms);
    cycle_id += 1;
    stop_orchestrator(&ctx, &deps, &mut group, shutdown_timeout, cycle_id, unix_seconds_now()).await?;

    Ok(CliOutput { stdout: format_summary(mode), stderr: String::new(), exit_code: ExitCode::Ok })
}

fn format_summary(mode: OutputMode) -> String {
    if mode.is_ndjson() {
        "{\"type\":\"summary\",\"status\":\"ok\",\"kind\":\"orchestrate\"}\n".to_owned()
    } else if mode.is_json() {
        "{\n  \"status\": \"ok\"\n}\n".to_owned()
    } else {
        "status: ok\n".to_owned()
    }
}

fn unix_seconds_now() -> f64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|duration| duration.as_secs_f64()).unwrap_or(0.0)
}
