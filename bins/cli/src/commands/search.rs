//! `search` command: the one client-facing search operation
//! (spec.md §A.5).

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::OutputMode;
use pyindex_domain::ProjectId;
use pyindex_facade::{SearchQuery, build_chunk_vectorize_deps, build_embedder, connect_storage, detect_embedding_dimension};
use pyindex_facade::run_search as facade_run_search;
use pyindex_shared::RequestContext;
use std::path::Path;

/// Embed `query` and return its nearest matches within `project_id`.
pub async fn run_search(mode: OutputMode, config_path: Option<&Path>, project_id: &str, query: &str, top_k: usize) -> Result<CliOutput, CliError> {
    let project_id = ProjectId::parse(project_id).map_err(pyindex_shared::ErrorEnvelope::from)?;

    let ctx = RequestContext::new_request();
    let config = pyindex_facade::load_effective_config(config_path)?;
    let storage = connect_storage(&config);
    let embedder = build_embedder(&config)?;
    let dimension = detect_embedding_dimension(&ctx, embedder.as_ref()).await?;
    let deps = build_chunk_vectorize_deps(&config, storage, dimension)?;

    let matches = facade_run_search(&ctx, &deps, SearchQuery { project_id: project_id.as_uuid(), text: query.into(), top_k }).await?;

    Ok(CliOutput { stdout: format_matches(mode, &matches), stderr: String::new(), exit_code: ExitCode::Ok })
}

fn format_matches(mode: OutputMode, matches: &[pyindex_facade::SearchResult]) -> String {
    if mode.is_ndjson() {
        let mut out = String::new();
        for found in matches {
            let payload = serde_json::json!({
                "type": "match",
                "filePath": found.file_path,
                "entityName": found.entity_name,
                "score": found.score,
                "chunkText": found.chunk_text,
            });
            out.push_str(&serde_json::to_string(&payload).unwrap_or_default());
            out.push('\n');
        }
        out
    } else if mode.is_json() {
        let payload: Vec<_> = matches
            .iter()
            .map(|found| {
                serde_json::json!({
                    "filePath": found.file_path,
                    "entityName": found.entity_name,
                    "score": found.score,
                    "chunkText": found.chunk_text,
                })
            })
            .collect();
        let mut out = serde_json::to_string_pretty(&payload).unwrap_or_default();
        out.push('\n');
        out
    } else if matches.is_empty() {
        "status: ok\nmatches: none\n".to_owned()
    } else {
        let mut out = "status: ok\n".to_owned();
        for found in matches {
            out.push_str(&format!(
                "{} ({}) score={}\n{}\n\n",
                found.file_path,
                found.entity_name.as_deref().unwrap_or("-"),
                found.score,
                found.chunk_text
            ));
        }
        out
    }
}
