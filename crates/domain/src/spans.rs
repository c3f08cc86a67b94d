//! Span and language helpers for domain metadata.

use crate::primitives::PrimitiveError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive line span with 1-indexed boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSpan {
    start_line: u32,
    end_line: u32,
}

impl LineSpan {
    /// Construct a validated line span.
    pub const fn new(start_line: u32, end_line: u32) -> Result<Self, PrimitiveError> {
        if start_line == 0 || end_line == 0 {
            return Err(PrimitiveError::LineSpanNonPositive {
                start_line,
                end_line,
            });
        }

        if start_line > end_line {
            return Err(PrimitiveError::LineSpanStartAfterEnd {
                start_line,
                end_line,
            });
        }

        Ok(Self {
            start_line,
            end_line,
        })
    }

    /// Returns the starting line (1-indexed).
    #[must_use]
    pub const fn start_line(&self) -> u32 {
        self.start_line
    }

    /// Returns the ending line (1-indexed).
    #[must_use]
    pub const fn end_line(&self) -> u32 {
        self.end_line
    }

    /// True when `line` falls within this span, inclusive.
    #[must_use]
    pub const fn contains_line(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    /// Number of lines covered by this span.
    #[must_use]
    pub const fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// File categories the file watcher accepts (spec.md §4.3: "source files of
/// the target language and plain configuration files").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python source files — the only parsed, entity-extracted language.
    Python,
    /// Plain configuration files (`.toml`, `.yaml`/`.yml`, `.json`, `.ini`,
    /// `.cfg`) tracked by the watcher but never parsed for entities.
    Config,
    /// Anything else that survives the watcher's ignore filters.
    Unknown,
}

impl Language {
    /// Returns the canonical string identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Config => "config",
            Self::Unknown => "unknown",
        }
    }

    /// Derive a language identifier from a file extension (without the dot).
    #[must_use]
    pub fn from_extension(extension: &str) -> Self {
        let trimmed = extension.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Self::Unknown;
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "py" | "pyi" => Self::Python,
            "toml" | "yaml" | "yml" | "json" | "ini" | "cfg" => Self::Config,
            _ => Self::Unknown,
        }
    }

    /// True for the entity-extracted language FW/IW track structurally.
    #[must_use]
    pub const fn is_source(self) -> bool {
        matches!(self, Self::Python)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn line_span_rejects_non_positive() {
        let error = LineSpan::new(0, 2).err();
        assert!(matches!(
            error,
            Some(PrimitiveError::LineSpanNonPositive { .. })
        ));
    }

    #[test]
    fn line_span_rejects_inverted_bounds() {
        let error = LineSpan::new(3, 2).err();
        assert!(matches!(
            error,
            Some(PrimitiveError::LineSpanStartAfterEnd { .. })
        ));
    }

    #[test]
    fn line_span_contains_line_checks_bounds() {
        let span = LineSpan::new(2, 5).expect("valid span");
        assert!(!span.contains_line(1));
        assert!(span.contains_line(2));
        assert!(span.contains_line(5));
        assert!(!span.contains_line(6));
    }

    #[test]
    fn language_from_extension_maps_values() {
        assert_eq!(Language::from_extension(".py"), Language::Python);
        assert_eq!(Language::from_extension("yaml"), Language::Config);
        assert_eq!(Language::from_extension(""), Language::Unknown);
        assert_eq!(Language::from_extension(".rs"), Language::Unknown);
    }

    proptest! {
        #[test]
        fn line_span_accepts_valid_ranges((start, end) in valid_line_span()) {
            let span = LineSpan::new(start, end);
            prop_assert!(span.is_ok());
        }
    }

    fn valid_line_span() -> impl Strategy<Value = (u32, u32)> {
        (1u32..2000, 1u32..2000).prop_map(|(start, end)| {
            if start <= end {
                (start, end)
            } else {
                (end, start)
            }
        })
    }
}
