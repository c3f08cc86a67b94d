//! `init` command: write a `projectid` marker file at a codebase root
//! (spec.md §3, §214 project discovery).

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::OutputMode;
use pyindex_domain::{ProjectId, ProjectMarker};
use std::path::Path;

const MARKER_FILE_NAME: &str = "projectid";

/// Write a `projectid` marker at `codebase_root`, generating a fresh
/// [`ProjectId`] unless one already exists there.
///
/// Refuses to overwrite an existing marker unless `force` is set; a
/// forced re-init keeps the existing id and only updates `description`,
/// since the id is what the File Watcher uses to recognize the project
/// across restarts.
pub fn run_init(mode: OutputMode, codebase_root: &Path, description: Option<&str>, force: bool) -> Result<CliOutput, CliError> {
    if !codebase_root.is_dir() {
        return Err(CliError::InvalidInput(format!("codebase root is not a directory: {}", codebase_root.display())));
    }

    let marker_path = codebase_root.join(MARKER_FILE_NAME);
    let existing = read_existing_marker(&marker_path)?;

    if existing.is_some() && !force {
        return Err(CliError::InvalidInput(format!(
            "a project marker already exists at {} (use --force to update its description)",
            marker_path.display()
        )));
    }

    let id = existing.as_ref().map_or_else(ProjectId::generate, |marker| marker.id);
    let marker = ProjectMarker { id, description: description.map(ToOwned::to_owned) };
    let body = serde_json::to_string_pretty(&marker)?;
    std::fs::write(&marker_path, body)?;

    let stdout = format_summary(mode, &marker, &marker_path);
    Ok(CliOutput { stdout, stderr: String::new(), exit_code: ExitCode::Ok })
}

fn read_existing_marker(marker_path: &Path) -> Result<Option<ProjectMarker>, CliError> {
    match std::fs::read_to_string(marker_path) {
        Ok(raw) => ProjectMarker::parse(&raw)
            .map(Some)
            .map_err(|error| CliError::InvalidInput(format!("existing marker at {} is invalid: {error}", marker_path.display()))),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn format_summary(mode: OutputMode, marker: &ProjectMarker, marker_path: &Path) -> String {
    let path_display = marker_path.display().to_string();
    let id_display = marker.id.to_string();
    if mode.is_ndjson() {
        let payload = serde_json::json!({
            "type": "summary",
            "status": "ok",
            "kind": "init",
            "projectId": id_display,
            "markerPath": path_display,
        });
        let mut out = serde_json::to_string(&payload).unwrap_or_default();
        out.push('\n');
        out
    } else if mode.is_json() {
        let payload = serde_json::json!({
            "status": "ok",
            "projectId": id_display,
            "description": marker.description,
            "markerPath": path_display,
        });
        let mut out = serde_json::to_string_pretty(&payload).unwrap_or_default();
        out.push('\n');
        out
    } else {
        format!("status: ok\nproject_id: {id_display}\nmarker_path: {path_display}\n")
    }
}
