//! Project and watch-directory entities (spec.md §3).

use crate::primitives::{PrimitiveError, ProjectId, WatchDirId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A root directory under which project directories are discovered by the
/// file watcher. `root_path` may be absent when the directory exists in
/// configuration but not (yet, or any longer) on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchDir {
    /// Configured identifier for this watch root.
    pub id: WatchDirId,
    /// Absolute path on disk, if it currently resolves.
    pub root_path: Option<PathBuf>,
    /// Creation timestamp (Unix seconds).
    pub created_at: f64,
    /// Last-updated timestamp (Unix seconds).
    pub updated_at: f64,
}

impl WatchDir {
    /// Construct a watch directory entry.
    #[must_use]
    pub fn new(id: WatchDirId, root_path: Option<PathBuf>, created_at: f64, updated_at: f64) -> Self {
        Self {
            id,
            root_path,
            created_at,
            updated_at,
        }
    }

    /// True when the configured path currently resolves on disk.
    #[must_use]
    pub fn is_present_on_disk(&self) -> bool {
        self.root_path.as_deref().is_some_and(std::path::Path::is_dir)
    }
}

/// A project discovered under a watch directory via a `projectid` marker
/// file. `root_path` is unique across all projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Stable identifier, sourced from the `projectid` marker.
    pub project_id: ProjectId,
    /// Absolute directory containing the marker file.
    pub root_path: PathBuf,
    /// Optional human-readable name from the marker's `description` field.
    pub name: Option<String>,
    /// Watch directory this project was discovered under.
    pub watch_dir_id: WatchDirId,
    /// Creation timestamp (Unix seconds).
    pub created_at: f64,
    /// Last-updated timestamp (Unix seconds).
    pub updated_at: f64,
}

impl Project {
    /// Construct a project record from a discovered marker.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        root_path: PathBuf,
        name: Option<String>,
        watch_dir_id: WatchDirId,
        created_at: f64,
        updated_at: f64,
    ) -> Self {
        Self {
            project_id,
            root_path,
            name,
            watch_dir_id,
            created_at,
            updated_at,
        }
    }
}

/// Contents of a `projectid` marker file, as read from disk.
///
/// Accepts the legacy plain-UUID form on read; always written as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMarker {
    /// Project identifier.
    pub id: ProjectId,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProjectMarker {
    /// Parse a marker file's raw contents, accepting either the JSON form
    /// `{"id": "...", "description": "..."}` or the legacy bare-UUID form.
    pub fn parse(raw: &str) -> Result<Self, PrimitiveError> {
        let trimmed = raw.trim();
        if let Ok(marker) = serde_json::from_str::<Self>(trimmed) {
            return Ok(marker);
        }

        let id = ProjectId::parse(trimmed)?;
        Ok(Self {
            id,
            description: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_marker_parses_json_form() {
        let raw = r#"{"id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","description":"demo"}"#;
        let marker = ProjectMarker::parse(raw).expect("valid marker json");
        assert_eq!(marker.description.as_deref(), Some("demo"));
    }

    #[test]
    fn project_marker_parses_legacy_bare_uuid() {
        let raw = "3fa85f64-5717-4562-b3fc-2c963f66afa6\n";
        let marker = ProjectMarker::parse(raw).expect("valid legacy marker");
        assert_eq!(marker.description, None);
    }

    #[test]
    fn project_marker_rejects_garbage() {
        assert!(ProjectMarker::parse("not json or uuid").is_err());
    }

    #[test]
    fn watch_dir_reports_absence_when_path_missing() {
        let watch_dir = WatchDir::new(
            WatchDirId::parse("root-1").expect("valid id"),
            Some(PathBuf::from("/does/not/exist/pyindex-test")),
            0.0,
            0.0,
        );
        assert!(!watch_dir.is_present_on_disk());
    }
}
