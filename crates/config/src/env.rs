//! Environment variable parsing and env-to-config merging.
//!
//! Env parsing is strict (invalid values fail fast) and deterministic
//! (CSV lists normalize to sorted/deduped values). Restricted to spec.md
//! §6's recognized key list — one `PYIDX_*` env var per configuration key.

use crate::schema::{ConfigSchemaError, PyIndexConfig, ValidatedPyIndexConfig, WatchDirEntry};
use pyindex_shared::ErrorCode;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Env var: `storage.path`.
pub const ENV_STORAGE_PATH: &str = "PYIDX_STORAGE_PATH";
/// Env var: `storage.backup_dir`.
pub const ENV_STORAGE_BACKUP_DIR: &str = "PYIDX_STORAGE_BACKUP_DIR";
/// Env var: `storage.request_socket`.
pub const ENV_STORAGE_REQUEST_SOCKET: &str = "PYIDX_STORAGE_REQUEST_SOCKET";

/// Env var: `watch.dirs[]`, comma-separated paths (legacy string form).
pub const ENV_WATCH_DIRS: &str = "PYIDX_WATCH_DIRS";
/// Env var: `watch.scan_interval`, seconds.
pub const ENV_WATCH_SCAN_INTERVAL: &str = "PYIDX_WATCH_SCAN_INTERVAL_SECS";
/// Env var: `watch.ignore_patterns[]`, comma-separated globs.
pub const ENV_WATCH_IGNORE_PATTERNS: &str = "PYIDX_WATCH_IGNORE_PATTERNS";
/// Env var: `watch.version_dir`.
pub const ENV_WATCH_VERSION_DIR: &str = "PYIDX_WATCH_VERSION_DIR";

/// Env var: `indexer.batch_size`.
pub const ENV_INDEXER_BATCH_SIZE: &str = "PYIDX_INDEXER_BATCH_SIZE";
/// Env var: `indexer.short_idle`, milliseconds.
pub const ENV_INDEXER_SHORT_IDLE_MS: &str = "PYIDX_INDEXER_SHORT_IDLE_MS";
/// Env var: `indexer.long_idle`, milliseconds.
pub const ENV_INDEXER_LONG_IDLE_MS: &str = "PYIDX_INDEXER_LONG_IDLE_MS";
/// Env var: `indexer.max_failures_per_file`.
pub const ENV_INDEXER_MAX_FAILURES_PER_FILE: &str = "PYIDX_INDEXER_MAX_FAILURES_PER_FILE";

/// Env var: `vectorizer.chunk_batch`.
pub const ENV_VECTORIZER_CHUNK_BATCH: &str = "PYIDX_VECTORIZER_CHUNK_BATCH";
/// Env var: `vectorizer.faiss_batch`.
pub const ENV_VECTORIZER_FAISS_BATCH: &str = "PYIDX_VECTORIZER_FAISS_BATCH";
/// Env var: `vectorizer.min_chunk_length`.
pub const ENV_VECTORIZER_MIN_CHUNK_LENGTH: &str = "PYIDX_VECTORIZER_MIN_CHUNK_LENGTH";
/// Env var: `vectorizer.max_in_flight_embed`.
pub const ENV_VECTORIZER_MAX_IN_FLIGHT_EMBED: &str = "PYIDX_VECTORIZER_MAX_IN_FLIGHT_EMBED";
/// Env var: `vectorizer.request_timeout`, milliseconds.
pub const ENV_VECTORIZER_REQUEST_TIMEOUT_MS: &str = "PYIDX_VECTORIZER_REQUEST_TIMEOUT_MS";
/// Env var: `vectorizer.breaker_threshold`.
pub const ENV_VECTORIZER_BREAKER_THRESHOLD: &str = "PYIDX_VECTORIZER_BREAKER_THRESHOLD";
/// Env var: `vectorizer.breaker_cooldown`, milliseconds.
pub const ENV_VECTORIZER_BREAKER_COOLDOWN_MS: &str = "PYIDX_VECTORIZER_BREAKER_COOLDOWN_MS";

/// Env var: `embedder.endpoint`.
pub const ENV_EMBEDDER_ENDPOINT: &str = "PYIDX_EMBEDDER_ENDPOINT";
/// Env var: `embedder.tls.cert`.
pub const ENV_EMBEDDER_TLS_CERT: &str = "PYIDX_EMBEDDER_TLS_CERT";
/// Env var: `embedder.tls.key`.
pub const ENV_EMBEDDER_TLS_KEY: &str = "PYIDX_EMBEDDER_TLS_KEY";
/// Env var: `embedder.tls.ca`.
pub const ENV_EMBEDDER_TLS_CA: &str = "PYIDX_EMBEDDER_TLS_CA";

/// Env var: `orchestrator.run_dir`.
pub const ENV_ORCHESTRATOR_RUN_DIR: &str = "PYIDX_ORCHESTRATOR_RUN_DIR";
/// Env var: `orchestrator.shutdown_timeout`, milliseconds.
pub const ENV_ORCHESTRATOR_SHUTDOWN_TIMEOUT_MS: &str = "PYIDX_ORCHESTRATOR_SHUTDOWN_TIMEOUT_MS";
/// Env var: `orchestrator.max_backoff`, milliseconds.
pub const ENV_ORCHESTRATOR_MAX_BACKOFF_MS: &str = "PYIDX_ORCHESTRATOR_MAX_BACKOFF_MS";

/// Env var: `workers.file_watcher.enabled`.
pub const ENV_WORKERS_FILE_WATCHER_ENABLED: &str = "PYIDX_WORKERS_FILE_WATCHER_ENABLED";
/// Env var: `workers.indexer.enabled`.
pub const ENV_WORKERS_INDEXER_ENABLED: &str = "PYIDX_WORKERS_INDEXER_ENABLED";
/// Env var: `workers.vectorizer.enabled`.
pub const ENV_WORKERS_VECTORIZER_ENABLED: &str = "PYIDX_WORKERS_VECTORIZER_ENABLED";

/// Raw, already-parsed values pulled from the process environment (or a
/// test-supplied map), one optional field per recognized config key.
#[derive(Debug, Clone, Default)]
pub struct PyIndexEnv {
    /// Override for `storage.path`.
    pub storage_path: Option<PathBuf>,
    /// Override for `storage.backup_dir`.
    pub storage_backup_dir: Option<PathBuf>,
    /// Override for `storage.request_socket`.
    pub storage_request_socket: Option<PathBuf>,
    /// Override for `watch.dirs[]`.
    pub watch_dirs: Option<Vec<PathBuf>>,
    /// Override for `watch.scan_interval`.
    pub watch_scan_interval_secs: Option<u64>,
    /// Override for `watch.ignore_patterns[]`.
    pub watch_ignore_patterns: Option<Vec<String>>,
    /// Override for `watch.version_dir`.
    pub watch_version_dir: Option<PathBuf>,
    /// Override for `indexer.batch_size`.
    pub indexer_batch_size: Option<u32>,
    /// Override for `indexer.short_idle`.
    pub indexer_short_idle_ms: Option<u64>,
    /// Override for `indexer.long_idle`.
    pub indexer_long_idle_ms: Option<u64>,
    /// Override for `indexer.max_failures_per_file`.
    pub indexer_max_failures_per_file: Option<u32>,
    /// Override for `vectorizer.chunk_batch`.
    pub vectorizer_chunk_batch: Option<u32>,
    /// Override for `vectorizer.faiss_batch`.
    pub vectorizer_faiss_batch: Option<u32>,
    /// Override for `vectorizer.min_chunk_length`.
    pub vectorizer_min_chunk_length: Option<u32>,
    /// Override for `vectorizer.max_in_flight_embed`.
    pub vectorizer_max_in_flight_embed: Option<u32>,
    /// Override for `vectorizer.request_timeout`.
    pub vectorizer_request_timeout_ms: Option<u64>,
    /// Override for `vectorizer.breaker_threshold`.
    pub vectorizer_breaker_threshold: Option<u32>,
    /// Override for `vectorizer.breaker_cooldown`.
    pub vectorizer_breaker_cooldown_ms: Option<u64>,
    /// Override for `embedder.endpoint`.
    pub embedder_endpoint: Option<String>,
    /// Override for `embedder.tls.cert`.
    pub embedder_tls_cert: Option<PathBuf>,
    /// Override for `embedder.tls.key`.
    pub embedder_tls_key: Option<PathBuf>,
    /// Override for `embedder.tls.ca`.
    pub embedder_tls_ca: Option<PathBuf>,
    /// Override for `orchestrator.run_dir`.
    pub orchestrator_run_dir: Option<PathBuf>,
    /// Override for `orchestrator.shutdown_timeout`.
    pub orchestrator_shutdown_timeout_ms: Option<u64>,
    /// Override for `orchestrator.max_backoff`.
    pub orchestrator_max_backoff_ms: Option<u64>,
    /// Override for `workers.file_watcher.enabled`.
    pub workers_file_watcher_enabled: Option<bool>,
    /// Override for `workers.indexer.enabled`.
    pub workers_indexer_enabled: Option<bool>,
    /// Override for `workers.vectorizer.enabled`.
    pub workers_vectorizer_enabled: Option<bool>,
}

impl PyIndexEnv {
    /// Parse overrides out of a supplied `name -> value` map (for tests or
    /// a non-`std::env` source).
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            storage_path: parse_optional_path(map, ENV_STORAGE_PATH)?,
            storage_backup_dir: parse_optional_path(map, ENV_STORAGE_BACKUP_DIR)?,
            storage_request_socket: parse_optional_path(map, ENV_STORAGE_REQUEST_SOCKET)?,
            watch_dirs: parse_optional_csv_paths(map, ENV_WATCH_DIRS)?,
            watch_scan_interval_secs: parse_optional_u64(map, ENV_WATCH_SCAN_INTERVAL)?,
            watch_ignore_patterns: parse_optional_csv(map, ENV_WATCH_IGNORE_PATTERNS),
            watch_version_dir: parse_optional_path(map, ENV_WATCH_VERSION_DIR)?,
            indexer_batch_size: parse_optional_u32(map, ENV_INDEXER_BATCH_SIZE)?,
            indexer_short_idle_ms: parse_optional_u64(map, ENV_INDEXER_SHORT_IDLE_MS)?,
            indexer_long_idle_ms: parse_optional_u64(map, ENV_INDEXER_LONG_IDLE_MS)?,
            indexer_max_failures_per_file: parse_optional_u32(map, ENV_INDEXER_MAX_FAILURES_PER_FILE)?,
            vectorizer_chunk_batch: parse_optional_u32(map, ENV_VECTORIZER_CHUNK_BATCH)?,
            vectorizer_faiss_batch: parse_optional_u32(map, ENV_VECTORIZER_FAISS_BATCH)?,
            vectorizer_min_chunk_length: parse_optional_u32(map, ENV_VECTORIZER_MIN_CHUNK_LENGTH)?,
            vectorizer_max_in_flight_embed: parse_optional_u32(map, ENV_VECTORIZER_MAX_IN_FLIGHT_EMBED)?,
            vectorizer_request_timeout_ms: parse_optional_u64(map, ENV_VECTORIZER_REQUEST_TIMEOUT_MS)?,
            vectorizer_breaker_threshold: parse_optional_u32(map, ENV_VECTORIZER_BREAKER_THRESHOLD)?,
            vectorizer_breaker_cooldown_ms: parse_optional_u64(map, ENV_VECTORIZER_BREAKER_COOLDOWN_MS)?,
            embedder_endpoint: parse_optional_trimmed_string(map, ENV_EMBEDDER_ENDPOINT)?,
            embedder_tls_cert: parse_optional_path(map, ENV_EMBEDDER_TLS_CERT)?,
            embedder_tls_key: parse_optional_path(map, ENV_EMBEDDER_TLS_KEY)?,
            embedder_tls_ca: parse_optional_path(map, ENV_EMBEDDER_TLS_CA)?,
            orchestrator_run_dir: parse_optional_path(map, ENV_ORCHESTRATOR_RUN_DIR)?,
            orchestrator_shutdown_timeout_ms: parse_optional_u64(map, ENV_ORCHESTRATOR_SHUTDOWN_TIMEOUT_MS)?,
            orchestrator_max_backoff_ms: parse_optional_u64(map, ENV_ORCHESTRATOR_MAX_BACKOFF_MS)?,
            workers_file_watcher_enabled: parse_optional_bool(map, ENV_WORKERS_FILE_WATCHER_ENABLED)?,
            workers_indexer_enabled: parse_optional_bool(map, ENV_WORKERS_INDEXER_ENABLED)?,
            workers_vectorizer_enabled: parse_optional_bool(map, ENV_WORKERS_VECTORIZER_ENABLED)?,
        })
    }

    /// Parse overrides out of the real process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        let map: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_map(&map)
    }
}

/// Apply env overrides onto a base config, then validate the result.
pub fn apply_env_overrides(base: PyIndexConfig, env: &PyIndexEnv) -> Result<ValidatedPyIndexConfig, ConfigSchemaError> {
    let mut config = base;

    if let Some(path) = &env.storage_path {
        config.storage.path.clone_from(path);
    }
    if let Some(path) = &env.storage_backup_dir {
        config.storage.backup_dir.clone_from(path);
    }
    if let Some(path) = &env.storage_request_socket {
        config.storage.request_socket.clone_from(path);
    }
    if let Some(dirs) = &env.watch_dirs {
        config.watch.dirs = dirs.iter().cloned().map(WatchDirEntry::from_legacy_string).collect();
    }
    if let Some(value) = env.watch_scan_interval_secs {
        config.watch.scan_interval_secs = value;
    }
    if let Some(patterns) = &env.watch_ignore_patterns {
        config.watch.ignore_patterns = patterns.clone();
    }
    config.watch.version_dir = env.watch_version_dir.clone().or(config.watch.version_dir);

    if let Some(value) = env.indexer_batch_size {
        config.indexer.batch_size = value;
    }
    if let Some(value) = env.indexer_short_idle_ms {
        config.indexer.short_idle_ms = value;
    }
    if let Some(value) = env.indexer_long_idle_ms {
        config.indexer.long_idle_ms = value;
    }
    if let Some(value) = env.indexer_max_failures_per_file {
        config.indexer.max_failures_per_file = value;
    }

    if let Some(value) = env.vectorizer_chunk_batch {
        config.vectorizer.chunk_batch = value;
    }
    if let Some(value) = env.vectorizer_faiss_batch {
        config.vectorizer.faiss_batch = value;
    }
    if let Some(value) = env.vectorizer_min_chunk_length {
        config.vectorizer.min_chunk_length = value;
    }
    if let Some(value) = env.vectorizer_max_in_flight_embed {
        config.vectorizer.max_in_flight_embed = value;
    }
    if let Some(value) = env.vectorizer_request_timeout_ms {
        config.vectorizer.request_timeout_ms = value;
    }
    if let Some(value) = env.vectorizer_breaker_threshold {
        config.vectorizer.breaker_threshold = value;
    }
    if let Some(value) = env.vectorizer_breaker_cooldown_ms {
        config.vectorizer.breaker_cooldown_ms = value;
    }

    if let Some(endpoint) = &env.embedder_endpoint {
        config.embedder.endpoint.clone_from(endpoint);
    }
    config.embedder.tls.cert = env.embedder_tls_cert.clone().or(config.embedder.tls.cert);
    config.embedder.tls.key = env.embedder_tls_key.clone().or(config.embedder.tls.key);
    config.embedder.tls.ca = env.embedder_tls_ca.clone().or(config.embedder.tls.ca);

    if let Some(path) = &env.orchestrator_run_dir {
        config.orchestrator.run_dir.clone_from(path);
    }
    if let Some(value) = env.orchestrator_shutdown_timeout_ms {
        config.orchestrator.shutdown_timeout_ms = value;
    }
    if let Some(value) = env.orchestrator_max_backoff_ms {
        config.orchestrator.max_backoff_ms = value;
    }

    if let Some(value) = env.workers_file_watcher_enabled {
        config.workers.file_watcher_enabled = value;
    }
    if let Some(value) = env.workers_indexer_enabled {
        config.workers.indexer_enabled = value;
    }
    if let Some(value) = env.workers_vectorizer_enabled {
        config.workers.vectorizer_enabled = value;
    }

    config.validate_and_normalize()
}

/// Environment variable parsing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Boolean env var had an invalid value.
    InvalidBool {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
}

impl EnvParseError {
    /// Stable error code for this parse failure.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::config_error()
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { var } => write!(formatter, "{var} is set but empty"),
            Self::InvalidInt { var, value } => write!(formatter, "{var}={value:?} is not a valid integer"),
            Self::InvalidBool { var, value } => write!(formatter, "{var}={value:?} is not a valid boolean"),
        }
    }
}

impl std::error::Error for EnvParseError {}

fn parse_optional_trimmed_string(map: &BTreeMap<String, String>, var: &'static str) -> Result<Option<String>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }
    Ok(Some(trimmed.to_string()))
}

fn parse_optional_path(map: &BTreeMap<String, String>, var: &'static str) -> Result<Option<PathBuf>, EnvParseError> {
    Ok(parse_optional_trimmed_string(map, var)?.map(PathBuf::from))
}

fn parse_optional_u64(map: &BTreeMap<String, String>, var: &'static str) -> Result<Option<u64>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }
    trimmed.parse::<u64>().map(Some).map_err(|_| EnvParseError::InvalidInt { var, value: raw.clone() })
}

fn parse_optional_u32(map: &BTreeMap<String, String>, var: &'static str) -> Result<Option<u32>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }
    trimmed.parse::<u32>().map(Some).map_err(|_| EnvParseError::InvalidInt { var, value: raw.clone() })
}

fn parse_optional_bool(map: &BTreeMap<String, String>, var: &'static str) -> Result<Option<bool>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Err(EnvParseError::EmptyValue { var }),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(EnvParseError::InvalidBool { var, value: raw.clone() }),
    }
}

fn parse_optional_csv(map: &BTreeMap<String, String>, var: &'static str) -> Option<Vec<String>> {
    let raw = map.get(var)?;
    let mut items: Vec<String> = raw.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string).collect();
    items.sort();
    items.dedup();
    Some(items)
}

fn parse_optional_csv_paths(map: &BTreeMap<String, String>, var: &'static str) -> Result<Option<Vec<PathBuf>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let paths: Vec<PathBuf> = raw.split(',').map(str::trim).filter(|item| !item.is_empty()).map(PathBuf::from).collect();
    if paths.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }
    Ok(Some(paths))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect()
    }

    #[test]
    fn applies_storage_and_watch_overrides() {
        let env = PyIndexEnv::from_map(&map(&[
            (ENV_STORAGE_PATH, "/data/pyindex.db"),
            (ENV_WATCH_SCAN_INTERVAL, "10"),
            (ENV_WATCH_IGNORE_PATTERNS, "b/*, a/*, a/*"),
        ]))
        .expect("valid env");

        let validated = apply_env_overrides(PyIndexConfig::default(), &env).expect("valid config");
        assert_eq!(validated.raw().storage.path, PathBuf::from("/data/pyindex.db"));
        assert_eq!(validated.raw().watch.scan_interval_secs, 10);
        assert_eq!(validated.raw().watch.ignore_patterns, vec!["a/*".to_string(), "b/*".to_string()]);
    }

    #[test]
    fn rejects_invalid_bool() {
        let error = PyIndexEnv::from_map(&map(&[(ENV_WORKERS_INDEXER_ENABLED, "maybe")])).expect_err("invalid bool");
        assert!(matches!(error, EnvParseError::InvalidBool { .. }));
    }

    #[test]
    fn rejects_empty_value() {
        let error = PyIndexEnv::from_map(&map(&[(ENV_STORAGE_PATH, "   ")])).expect_err("empty value");
        assert!(matches!(error, EnvParseError::EmptyValue { .. }));
    }

    #[test]
    fn accepts_truthy_and_falsy_bool_spellings() {
        let env = PyIndexEnv::from_map(&map(&[(ENV_WORKERS_VECTORIZER_ENABLED, "off")])).expect("valid bool");
        assert_eq!(env.workers_vectorizer_enabled, Some(false));
    }
}
