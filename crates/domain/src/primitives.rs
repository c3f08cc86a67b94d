//! Domain primitives with validated constructors.

use pyindex_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Validation failures for domain primitives and spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// `ProjectId` is not a well-formed UUID.
    InvalidProjectId {
        /// Raw input that failed to parse as a UUID.
        input: String,
    },
    /// `WatchDirId` is empty after trimming.
    InvalidWatchDirId {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// `FileId` must be a positive row identifier.
    InvalidFileId {
        /// Candidate value that failed validation.
        value: i64,
    },
    /// `EntityId` must be a positive row identifier.
    InvalidEntityId {
        /// Candidate value that failed validation.
        value: i64,
    },
    /// `RelativePath` is empty, absolute, or escapes its root via `..`.
    InvalidRelativePath {
        /// Raw input that failed validation.
        input: String,
    },
    /// `LineSpan` start/end must be >= 1.
    LineSpanNonPositive {
        /// Starting line (1-indexed).
        start_line: u32,
        /// Ending line (1-indexed).
        end_line: u32,
    },
    /// `LineSpan` start must be <= end.
    LineSpanStartAfterEnd {
        /// Starting line (1-indexed).
        start_line: u32,
        /// Ending line (1-indexed).
        end_line: u32,
    },
}

impl PrimitiveError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidProjectId { .. } => ErrorCode::new("domain", "invalid_project_id"),
            Self::InvalidWatchDirId { .. } => ErrorCode::new("domain", "invalid_watch_dir_id"),
            Self::InvalidFileId { .. } => ErrorCode::new("domain", "invalid_file_id"),
            Self::InvalidEntityId { .. } => ErrorCode::new("domain", "invalid_entity_id"),
            Self::InvalidRelativePath { .. } => ErrorCode::new("domain", "invalid_relative_path"),
            Self::LineSpanNonPositive { .. } | Self::LineSpanStartAfterEnd { .. } => {
                ErrorCode::new("domain", "invalid_line_span")
            },
        }
    }
}

impl fmt::Display for PrimitiveError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidProjectId { .. } => {
                formatter.write_str("ProjectId must be a well-formed UUID")
            },
            Self::InvalidWatchDirId { .. } => formatter.write_str("WatchDirId must be non-empty"),
            Self::InvalidFileId { .. } => formatter.write_str("FileId must be positive"),
            Self::InvalidEntityId { .. } => formatter.write_str("EntityId must be positive"),
            Self::InvalidRelativePath { .. } => formatter.write_str(
                "RelativePath must be non-empty, relative, and free of `..` components",
            ),
            Self::LineSpanNonPositive { .. } => {
                formatter.write_str("LineSpan start_line/end_line must be >= 1")
            },
            Self::LineSpanStartAfterEnd { .. } => {
                formatter.write_str("LineSpan start_line must be <= end_line")
            },
        }
    }
}

impl std::error::Error for PrimitiveError {}

impl From<PrimitiveError> for ErrorEnvelope {
    fn from(error: PrimitiveError) -> Self {
        let mut envelope = Self::expected(error.error_code(), error.to_string());

        match error {
            PrimitiveError::InvalidProjectId { input }
            | PrimitiveError::InvalidRelativePath { input } => {
                envelope = envelope.with_metadata("input", input);
            },
            PrimitiveError::InvalidWatchDirId { input_length } => {
                envelope = envelope.with_metadata("input_length", input_length.to_string());
            },
            PrimitiveError::InvalidFileId { value }
            | PrimitiveError::InvalidEntityId { value } => {
                envelope = envelope.with_metadata("value", value.to_string());
            },
            PrimitiveError::LineSpanNonPositive {
                start_line,
                end_line,
            }
            | PrimitiveError::LineSpanStartAfterEnd {
                start_line,
                end_line,
            } => {
                envelope = envelope
                    .with_metadata("start_line", start_line.to_string())
                    .with_metadata("end_line", end_line.to_string());
            },
        }

        envelope
    }
}

/// Stable identifier for a project, discovered from a `projectid` marker
/// file at the project root (a UUID, per spec.md §3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    /// Parse a `ProjectId` from a UUID string (marker file `id` field, or
    /// the legacy plain-UUID marker form).
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| PrimitiveError::InvalidProjectId {
                input: raw.to_owned(),
            })
    }

    /// Generate a fresh random `ProjectId` for a newly discovered project.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

/// Identifier for a watch directory root (spec.md §3 "WatchDir").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchDirId(Box<str>);

impl WatchDirId {
    /// Parse a `WatchDirId` from configuration input.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PrimitiveError::InvalidWatchDirId {
                input_length: raw.len(),
            });
        }

        Ok(Self(trimmed.to_owned().into_boxed_str()))
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for WatchDirId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for WatchDirId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Integer row identifier for a `File` (spec.md §3: "integer `file_id`").
///
/// Assigned by the Storage Engine; this wrapper only guarantees positivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(i64);

impl FileId {
    /// Construct a validated `FileId` from a storage row id.
    pub const fn new(value: i64) -> Result<Self, PrimitiveError> {
        if value <= 0 {
            return Err(PrimitiveError::InvalidFileId { value });
        }

        Ok(Self(value))
    }

    /// Returns the underlying row id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

/// Integer row identifier shared by classes, methods, functions, imports,
/// code chunks, and cross-reference rows. Distinguishing which table a
/// given id belongs to is the job of the enum that carries it
/// (see [`crate::cross_ref::EntityRef`]), not the id type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// Construct a validated `EntityId` from a storage row id.
    pub const fn new(value: i64) -> Result<Self, PrimitiveError> {
        if value <= 0 {
            return Err(PrimitiveError::InvalidEntityId { value });
        }

        Ok(Self(value))
    }

    /// Returns the underlying row id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

/// A path relative to a project root, using `/` separators and containing
/// no `..` components (spec.md §3 "File.path ... project-relative").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelativePath(Box<str>);

impl RelativePath {
    /// Parse and normalize a relative path.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        let normalized = raw.replace('\\', "/");
        let trimmed = normalized.trim_matches('/');

        if trimmed.is_empty() || normalized.starts_with('/') {
            return Err(PrimitiveError::InvalidRelativePath {
                input: raw.to_owned(),
            });
        }

        if trimmed.split('/').any(|segment| segment == "..") {
            return Err(PrimitiveError::InvalidRelativePath {
                input: raw.to_owned(),
            });
        }

        Ok(Self(trimmed.to_owned().into_boxed_str()))
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn project_id_rejects_non_uuid_input() {
        let error = ProjectId::parse("not-a-uuid").err();
        assert!(matches!(
            error,
            Some(PrimitiveError::InvalidProjectId { .. })
        ));
    }

    #[test]
    fn project_id_round_trips_through_display() {
        let generated = ProjectId::generate();
        let rendered = generated.to_string();
        let parsed = ProjectId::parse(&rendered).expect("generated id reparses");
        assert_eq!(generated, parsed);
    }

    #[test]
    fn watch_dir_id_rejects_blank_input() {
        let error = WatchDirId::parse("   ").err();
        assert!(matches!(
            error,
            Some(PrimitiveError::InvalidWatchDirId { .. })
        ));
    }

    #[test]
    fn file_id_rejects_non_positive_values() {
        assert!(matches!(
            FileId::new(0),
            Err(PrimitiveError::InvalidFileId { value: 0 })
        ));
        assert!(matches!(
            FileId::new(-3),
            Err(PrimitiveError::InvalidFileId { value: -3 })
        ));
        assert!(FileId::new(7).is_ok());
    }

    #[test]
    fn entity_id_rejects_non_positive_values() {
        assert!(matches!(
            EntityId::new(0),
            Err(PrimitiveError::InvalidEntityId { value: 0 })
        ));
        assert!(EntityId::new(1).is_ok());
    }

    #[test]
    fn relative_path_rejects_absolute_and_parent_escapes() {
        assert!(matches!(
            RelativePath::parse("/etc/passwd"),
            Err(PrimitiveError::InvalidRelativePath { .. })
        ));
        assert!(matches!(
            RelativePath::parse("../outside.py"),
            Err(PrimitiveError::InvalidRelativePath { .. })
        ));
        assert!(matches!(
            RelativePath::parse(""),
            Err(PrimitiveError::InvalidRelativePath { .. })
        ));
    }

    #[test]
    fn relative_path_normalizes_separators_and_trims_slashes() {
        let parsed = RelativePath::parse("/src/pkg/mod.py/").expect("valid relative path");
        assert_eq!(parsed.as_str(), "src/pkg/mod.py");
    }

    proptest! {
        #[test]
        fn relative_path_accepts_simple_segments(segments in proptest::collection::vec("[a-zA-Z0-9_]{1,12}", 1..6)) {
            let candidate = segments.join("/");
            let parsed = RelativePath::parse(&candidate);
            prop_assert!(parsed.is_ok());
        }
    }
}
