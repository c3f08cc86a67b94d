//! Structured logging boundary contract.

use std::collections::BTreeMap;

/// Log level.
///
/// Extended with [`LogLevel::Critical`] beyond the teacher's four-level
/// set, matching spec.md §6's unified log line `LEVEL ∈ {DEBUG, INFO,
/// WARNING, ERROR, CRITICAL}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
    /// Critical — fatal to the reporting subsystem.
    Critical,
}

impl LogLevel {
    /// Canonical uppercase name used in the unified log line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Importance value on the spec's `[0..10]` scale, derived solely
    /// from the level (spec.md §6: "importance derived from level").
    #[must_use]
    pub const fn importance(self) -> u8 {
        match self {
            Self::Debug => 2,
            Self::Info => 4,
            Self::Warn => 6,
            Self::Error => 8,
            Self::Critical => 10,
        }
    }

    /// Parse a level from its canonical uppercase name, case-insensitive.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Additional event fields.
pub type LogFields = BTreeMap<Box<str>, serde_json::Value>;

/// Structured log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Stable event name.
    pub event: Box<str>,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message (safe, redacted). Must not contain `|`
    /// (spec.md §6: "The `|` character is disallowed in `message`").
    pub message: Box<str>,
    /// Optional structured fields.
    pub fields: Option<LogFields>,
    /// Optional error payload.
    pub error: Option<serde_json::Value>,
}

/// Boundary contract for structured logging.
pub trait LoggerPort: Send + Sync {
    /// Emit a structured event.
    fn log(&self, event: LogEvent);

    /// Create a child logger with base fields applied to every event.
    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort>;

    /// Convenience: debug event.
    fn debug(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent {
            event: event.to_owned().into_boxed_str(),
            level: LogLevel::Debug,
            message: message.to_owned().into_boxed_str(),
            fields,
            error: None,
        });
    }

    /// Convenience: info event.
    fn info(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent {
            event: event.to_owned().into_boxed_str(),
            level: LogLevel::Info,
            message: message.to_owned().into_boxed_str(),
            fields,
            error: None,
        });
    }

    /// Convenience: warn event.
    fn warn(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent {
            event: event.to_owned().into_boxed_str(),
            level: LogLevel::Warn,
            message: message.to_owned().into_boxed_str(),
            fields,
            error: None,
        });
    }

    /// Convenience: error event.
    fn error(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent {
            event: event.to_owned().into_boxed_str(),
            level: LogLevel::Error,
            message: message.to_owned().into_boxed_str(),
            fields,
            error: None,
        });
    }

    /// Convenience: critical event — WO treats these as fatal (spec.md §7:
    /// `StorageCorruption`, `SchemaMismatch`).
    fn critical(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogEvent {
            event: event.to_owned().into_boxed_str(),
            level: LogLevel::Critical,
            message: message.to_owned().into_boxed_str(),
            fields,
            error: None,
        });
    }
}
