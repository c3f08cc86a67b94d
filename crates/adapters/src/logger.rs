//! Unified pipe-delimited log line adapter (spec.md §6).
//!
//! Grounded on the teacher's `JsonLogger` (sink abstraction, redaction,
//! child-logger field merge) but renders
//! `YYYY-MM-DD HH:MM:SS | LEVEL | IMPORTANCE | message` instead of JSON
//! lines, since that is the wire format spec.md §6 names.

use crate::log_sink::LogSink;
use pyindex_ports::{LogEvent, LogFields, LogLevel, LoggerPort};
use pyindex_shared::redaction::{REDACTED, is_secret_key};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Logger emitting one unified log line per event.
#[derive(Clone)]
pub struct UnifiedLineLogger {
    sink: Arc<dyn LogSink>,
    base_fields: LogFields,
    min_level: LogLevel,
}

impl UnifiedLineLogger {
    /// Create a logger backed by the provided sink.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            base_fields: LogFields::new(),
            min_level: LogLevel::Info,
        }
    }

    /// Set base fields applied to every event (rendered as a trailing
    /// redacted JSON suffix, since the unified line has no fields column).
    #[must_use]
    pub fn with_base_fields(mut self, fields: LogFields) -> Self {
        self.base_fields = fields;
        self
    }

    /// Set the minimum log level.
    #[must_use]
    pub const fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl LoggerPort for UnifiedLineLogger {
    fn log(&self, event: LogEvent) {
        if !should_log(self.min_level, event.level) {
            return;
        }

        let mut fields = self.base_fields.clone();
        if let Some(extra) = event.fields {
            for (key, value) in extra {
                fields.insert(key, value);
            }
        }
        redact_fields(&mut fields);

        let mut error = event.error;
        if let Some(ref mut value) = error {
            redact_value(value);
        }

        let message = sanitize_message(&event.message);
        let mut line = format!(
            "{} | {} | {} | {message}",
            format_timestamp(now_epoch_ms()),
            event.level.as_str(),
            event.level.importance(),
        );

        if !fields.is_empty() || error.is_some() {
            let mut context = serde_json::Map::new();
            context.insert("event".to_string(), Value::String(event.event.to_string()));
            if !fields.is_empty() {
                context.insert("fields".to_string(), fields_to_json(&fields));
            }
            if let Some(error) = error {
                context.insert("error".to_string(), error);
            }
            if let Ok(encoded) = serde_json::to_string(&Value::Object(context)) {
                line.push(' ');
                line.push_str(&sanitize_message(&encoded));
            }
        }
        line.push('\n');
        self.sink.write_line(&line);
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut merged = self.base_fields.clone();
        for (key, value) in fields {
            merged.insert(key, value);
        }
        Box::new(Self {
            sink: Arc::clone(&self.sink),
            base_fields: merged,
            min_level: self.min_level,
        })
    }
}

const fn should_log(min_level: LogLevel, level: LogLevel) -> bool {
    level_rank(level) >= level_rank(min_level)
}

const fn level_rank(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 10,
        LogLevel::Info => 20,
        LogLevel::Warn => 30,
        LogLevel::Error => 40,
        LogLevel::Critical => 50,
    }
}

/// The `|` character is disallowed in `message` (spec.md §6); replace it
/// rather than silently drop content.
fn sanitize_message(message: &str) -> String {
    message.replace('|', "/")
}

fn format_timestamp(epoch_ms: u64) -> String {
    let epoch_secs = epoch_ms / 1000;
    let days = epoch_secs / 86_400;
    let secs_of_day = epoch_secs % 86_400;
    let (year, month, day) = civil_from_days(i64::try_from(days).unwrap_or(0));
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
}

/// Howard Hinnant's `civil_from_days`: days-since-epoch to proleptic
/// Gregorian calendar date, used so the unified log line needs no extra
/// date/time dependency beyond what the teacher already pulls in.
const fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { y + 1 } else { y };
    (year, month, day)
}

fn fields_to_json(fields: &LogFields) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in fields {
        map.insert(key.to_string(), value.clone());
    }
    Value::Object(map)
}

fn redact_fields(fields: &mut LogFields) {
    for (key, value) in fields.iter_mut() {
        if is_secret_key(key) {
            *value = Value::String(REDACTED.to_string());
        } else {
            redact_value(value);
        }
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                if is_secret_key(key) {
                    *nested = Value::String(REDACTED.to_string());
                } else {
                    redact_value(nested);
                }
            }
        },
        Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        },
        _ => {},
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::LogSink;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MemorySink {
        lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        fn take(&self) -> Vec<String> {
            let mut guard = self.lines.lock().expect("memory sink lock");
            std::mem::take(&mut *guard)
        }
    }

    impl LogSink for MemorySink {
        fn write_line(&self, line: &str) {
            let mut guard = self.lines.lock().expect("memory sink lock");
            guard.push(line.to_string());
        }
    }

    #[test]
    fn emits_unified_line_with_level_and_importance() {
        let sink = Arc::new(MemorySink::default());
        let logger = UnifiedLineLogger::new(sink.clone()).with_min_level(LogLevel::Debug);

        logger.log(LogEvent {
            event: "test.event".into(),
            level: LogLevel::Warn,
            message: "disk nearly full".into(),
            fields: None,
            error: None,
        });

        let lines = sink.take();
        assert_eq!(lines.len(), 1);
        let parts: Vec<&str> = lines[0].trim().splitn(4, " | ").collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1], "WARNING");
        assert_eq!(parts[2], "6");
        assert!(parts[3].starts_with("disk nearly full"));
    }

    #[test]
    fn pipe_characters_in_message_are_sanitized() {
        let sink = Arc::new(MemorySink::default());
        let logger = UnifiedLineLogger::new(sink.clone()).with_min_level(LogLevel::Debug);

        logger.log(LogEvent {
            event: "test.event".into(),
            level: LogLevel::Info,
            message: "a | b".into(),
            fields: None,
            error: None,
        });

        let lines = sink.take();
        assert!(!lines[0].trim_end().ends_with("a | b"));
        assert!(lines[0].contains("a / b"));
    }

    #[test]
    fn below_min_level_is_dropped() {
        let sink = Arc::new(MemorySink::default());
        let logger = UnifiedLineLogger::new(sink.clone()).with_min_level(LogLevel::Warn);
        logger.log(LogEvent {
            event: "test.event".into(),
            level: LogLevel::Info,
            message: "ignored".into(),
            fields: None,
            error: None,
        });
        assert!(sink.take().is_empty());
    }

    #[test]
    fn redacts_sensitive_fields_in_trailing_context() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(MemorySink::default());
        let logger = UnifiedLineLogger::new(sink.clone()).with_min_level(LogLevel::Debug);

        let mut fields = LogFields::new();
        fields.insert(
            "apiKey".to_owned().into_boxed_str(),
            Value::String("secret".to_string()),
        );

        logger.log(LogEvent {
            event: "test.event".into(),
            level: LogLevel::Info,
            message: "testing".into(),
            fields: Some(fields),
            error: Some(json!({ "token": "should-hide" })), // pragma: allowlist secret
        });

        let line = sink.take().remove(0);
        assert!(line.contains(REDACTED));
        assert!(!line.contains("should-hide"));
        Ok(())
    }

    #[test]
    fn child_logger_merges_fields() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(MemorySink::default());
        let logger = UnifiedLineLogger::new(sink.clone()).with_min_level(LogLevel::Debug);

        let mut base = LogFields::new();
        base.insert(
            "correlationId".to_owned().into_boxed_str(),
            Value::String("req_123".to_string()),
        );
        let child = logger.child(base);
        child.info("test.child", "child log", None);

        let line = sink.take().remove(0);
        assert!(line.contains("req_123"));
        Ok(())
    }
}
