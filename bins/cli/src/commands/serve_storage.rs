//! `serve-storage` command: run the Storage Engine request broker
//! (spec.md §4.1, §6 "Storage request socket").

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::OutputMode;
use pyindex_facade::{bind_storage_broker, load_effective_config, run_storage_broker};
use std::path::Path;

/// Bind the Storage Engine's request socket and serve it until killed.
pub async fn run_serve_storage(mode: OutputMode, config_path: Option<&Path>) -> Result<CliOutput, CliError> {
    let config = load_effective_config(config_path)?;
    let (listener, engine) = bind_storage_broker(&config.raw().storage)?;
    let socket_path = config.raw().storage.request_socket.display().to_string();

    if !mode.no_progress {
        let _ = writeln_progress(&socket_path);
    }

    run_storage_broker(listener, engine).await?;

    Ok(CliOutput { stdout: format_summary(mode, &socket_path), stderr: String::new(), exit_code: ExitCode::Ok })
}

fn writeln_progress(socket_path: &str) -> std::io::Result<()> {
    use std::io::Write;
    writeln!(std::io::stderr(), "listening on {socket_path}")
}

fn format_summary(mode: OutputMode, socket_path: &str) -> String {
    if mode.is_ndjson() {
        let payload = serde_json::json!({"type": "summary", "status": "ok", "kind": "serve-storage", "socket": socket_path});
        let mut out = serde_json::to_string(&payload).unwrap_or_default();
        out.push('\n');
        out
    } else if mode.is_json() {
        let payload = serde_json::json!({"status": "ok", "socket": socket_path});
        let mut out = serde_json::to_string_pretty(&payload).unwrap_or_default();
        out.push('\n');
        out
    } else {
        format!("status: ok\nsocket: {socket_path}\n")
    }
}
