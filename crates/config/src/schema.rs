//! Configuration schema, defaults, validation, and normalization.
//!
//! Deserialization uses `serde` (JSON/TOML). Validation is manual and
//! returns typed errors mapped to `ErrorEnvelope`. Restricted to spec.md
//! §6's exact recognized key list — no general-purpose backend-selection
//! schema.

use pyindex_shared::{BoundedU32, BoundedU64, ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Current supported configuration schema version.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

const SCAN_INTERVAL_MIN_SECS: u64 = 1;
const SCAN_INTERVAL_MAX_SECS: u64 = 86_400;

const INDEXER_BATCH_SIZE_MIN: u32 = 1;
const INDEXER_BATCH_SIZE_MAX: u32 = 10_000;
const INDEXER_IDLE_MIN_MS: u64 = 10;
const INDEXER_IDLE_MAX_MS: u64 = 600_000;
const INDEXER_MAX_FAILURES_MIN: u32 = 1;
const INDEXER_MAX_FAILURES_MAX: u32 = 1_000;

const VECTORIZER_BATCH_MIN: u32 = 1;
const VECTORIZER_BATCH_MAX: u32 = 10_000;
const VECTORIZER_MIN_CHUNK_LENGTH_MIN: u32 = 0;
const VECTORIZER_MIN_CHUNK_LENGTH_MAX: u32 = 20_000;
const VECTORIZER_MAX_IN_FLIGHT_MIN: u32 = 1;
const VECTORIZER_MAX_IN_FLIGHT_MAX: u32 = 256;
const VECTORIZER_TIMEOUT_MIN_MS: u64 = 100;
const VECTORIZER_TIMEOUT_MAX_MS: u64 = 600_000;
const VECTORIZER_BREAKER_THRESHOLD_MIN: u32 = 1;
const VECTORIZER_BREAKER_THRESHOLD_MAX: u32 = 1_000;
const VECTORIZER_BREAKER_COOLDOWN_MIN_MS: u64 = 100;
const VECTORIZER_BREAKER_COOLDOWN_MAX_MS: u64 = 3_600_000;

const ORCHESTRATOR_SHUTDOWN_TIMEOUT_MIN_MS: u64 = 100;
const ORCHESTRATOR_SHUTDOWN_TIMEOUT_MAX_MS: u64 = 600_000;
const ORCHESTRATOR_MAX_BACKOFF_MIN_MS: u64 = 100;
const ORCHESTRATOR_MAX_BACKOFF_MAX_MS: u64 = 3_600_000;

const WATCH_IGNORE_PATTERNS_MAX: usize = 512;
const WATCH_DIRS_MAX: usize = 256;

/// A single configured watch root (spec.md §6 `watch.dirs[]`).
///
/// The legacy string form (a bare path) is accepted on parse by
/// [`WatchDirEntry::from_legacy_string`] and normalized into this shape;
/// writes always use the `{id, path}` object form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchDirEntry {
    /// Stable identifier for this watch root.
    pub id: String,
    /// Filesystem path to scan.
    pub path: PathBuf,
}

impl WatchDirEntry {
    /// Build a watch dir entry from the legacy bare-path string form,
    /// deriving `id` from the path itself.
    #[must_use]
    pub fn from_legacy_string(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path.to_string_lossy().into_owned();
        Self { id, path }
    }
}

/// Top-level configuration (spec.md §6 "Recognized configuration keys").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PyIndexConfig {
    /// Schema version for forward-compatible migrations.
    pub version: u32,
    /// Storage Engine settings (`storage.*`).
    pub storage: StorageConfig,
    /// File Watcher settings (`watch.*`).
    pub watch: WatchConfig,
    /// Indexing Worker settings (`indexer.*`).
    pub indexer: IndexerConfig,
    /// Chunking/Vectorization Worker settings (`vectorizer.*`).
    pub vectorizer: VectorizerConfig,
    /// Embedder connection settings (`embedder.*`).
    pub embedder: EmbedderConfig,
    /// Worker Orchestrator settings (`orchestrator.*`).
    pub orchestrator: OrchestratorConfig,
    /// Per-worker enable flags (`workers.*.enabled`).
    pub workers: WorkersConfig,
}

impl Default for PyIndexConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            storage: StorageConfig::default(),
            watch: WatchConfig::default(),
            indexer: IndexerConfig::default(),
            vectorizer: VectorizerConfig::default(),
            embedder: EmbedderConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            workers: WorkersConfig::default(),
        }
    }
}

impl PyIndexConfig {
    /// Validate and normalize the config, producing a [`ValidatedPyIndexConfig`].
    pub fn validate_and_normalize(mut self) -> Result<ValidatedPyIndexConfig, ConfigSchemaError> {
        self.validate_version()?;
        self.storage.validate()?;
        self.watch.normalize_and_validate()?;
        self.indexer.validate()?;
        self.vectorizer.validate()?;
        self.embedder.validate()?;
        self.orchestrator.validate()?;

        let limits = ConfigLimits::new(&self)?;
        Ok(ValidatedPyIndexConfig { raw: self, limits })
    }

    const fn validate_version(&self) -> Result<(), ConfigSchemaError> {
        if self.version != CURRENT_CONFIG_VERSION {
            return Err(ConfigSchemaError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }
        Ok(())
    }
}

/// `storage.*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct StorageConfig {
    /// `storage.path` — primary data file path.
    pub path: PathBuf,
    /// `storage.backup_dir` — database backup destination.
    pub backup_dir: PathBuf,
    /// `storage.request_socket` — SE listening path (Unix domain socket).
    pub request_socket: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pyindex.db"),
            backup_dir: PathBuf::from("backups"),
            request_socket: PathBuf::from("pyindex.sock"),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        for (field, path) in [
            ("path", &self.path),
            ("backupDir", &self.backup_dir),
            ("requestSocket", &self.request_socket),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigSchemaError::InvalidPath {
                    section: "storage",
                    field,
                    path: path.display().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// `watch.*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct WatchConfig {
    /// `watch.dirs[]` — roots FW scans.
    pub dirs: Vec<WatchDirEntry>,
    /// `watch.scan_interval` — seconds between FW cycles.
    pub scan_interval_secs: u64,
    /// `watch.ignore_patterns[]` — globs excluded from scan.
    pub ignore_patterns: Vec<String>,
    /// `watch.version_dir` — optional destination for moved deleted files.
    pub version_dir: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            scan_interval_secs: 5,
            ignore_patterns: Vec::new(),
            version_dir: None,
        }
    }
}

impl WatchConfig {
    fn normalize_and_validate(&mut self) -> Result<(), ConfigSchemaError> {
        self.ignore_patterns.sort();
        self.ignore_patterns.dedup();
        if self.ignore_patterns.len() > WATCH_IGNORE_PATTERNS_MAX {
            return Err(ConfigSchemaError::ListTooLarge {
                section: "watch",
                field: "ignorePatterns",
                len: self.ignore_patterns.len(),
                max: WATCH_IGNORE_PATTERNS_MAX,
            });
        }
        if self.dirs.len() > WATCH_DIRS_MAX {
            return Err(ConfigSchemaError::ListTooLarge {
                section: "watch",
                field: "dirs",
                len: self.dirs.len(),
                max: WATCH_DIRS_MAX,
            });
        }
        if !(SCAN_INTERVAL_MIN_SECS..=SCAN_INTERVAL_MAX_SECS).contains(&self.scan_interval_secs) {
            return Err(ConfigSchemaError::TimeoutOutOfRange {
                section: "watch",
                field: "scanInterval",
                value_ms: self.scan_interval_secs,
                min_ms: SCAN_INTERVAL_MIN_SECS,
                max_ms: SCAN_INTERVAL_MAX_SECS,
            });
        }
        Ok(())
    }
}

/// `indexer.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct IndexerConfig {
    /// `indexer.batch_size`.
    pub batch_size: u32,
    /// `indexer.short_idle` — idle sleep (ms) when no files were processed.
    pub short_idle_ms: u64,
    /// `indexer.long_idle` — idle sleep (ms) after several empty cycles.
    pub long_idle_ms: u64,
    /// `indexer.max_failures_per_file` before a file is skipped.
    pub max_failures_per_file: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            short_idle_ms: 200,
            long_idle_ms: 5_000,
            max_failures_per_file: 5,
        }
    }
}

impl IndexerConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        check_u32_range("indexer", "batchSize", self.batch_size, INDEXER_BATCH_SIZE_MIN, INDEXER_BATCH_SIZE_MAX)?;
        check_ms_range("indexer", "shortIdle", self.short_idle_ms, INDEXER_IDLE_MIN_MS, INDEXER_IDLE_MAX_MS)?;
        check_ms_range("indexer", "longIdle", self.long_idle_ms, INDEXER_IDLE_MIN_MS, INDEXER_IDLE_MAX_MS)?;
        check_u32_range(
            "indexer",
            "maxFailuresPerFile",
            self.max_failures_per_file,
            INDEXER_MAX_FAILURES_MIN,
            INDEXER_MAX_FAILURES_MAX,
        )
    }
}

/// `vectorizer.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct VectorizerConfig {
    /// `vectorizer.chunk_batch` — chunks per Phase A call.
    pub chunk_batch: u32,
    /// `vectorizer.faiss_batch` — chunks per Phase B `VI.add` batch.
    pub faiss_batch: u32,
    /// `vectorizer.min_chunk_length` — docstrings shorter than this yield
    /// zero chunks (spec.md §8 boundary behavior).
    pub min_chunk_length: u32,
    /// `vectorizer.max_in_flight_embed`.
    pub max_in_flight_embed: u32,
    /// `vectorizer.request_timeout` (ms) for one EE call.
    pub request_timeout_ms: u64,
    /// `vectorizer.breaker_threshold` — consecutive `EmbedTransientError`s
    /// before the breaker opens.
    pub breaker_threshold: u32,
    /// `vectorizer.breaker_cooldown` (ms) before the breaker half-opens.
    pub breaker_cooldown_ms: u64,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            chunk_batch: 20,
            faiss_batch: 256,
            min_chunk_length: 5,
            max_in_flight_embed: 8,
            request_timeout_ms: 30_000,
            breaker_threshold: 3,
            breaker_cooldown_ms: 60_000,
        }
    }
}

impl VectorizerConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        check_u32_range("vectorizer", "chunkBatch", self.chunk_batch, VECTORIZER_BATCH_MIN, VECTORIZER_BATCH_MAX)?;
        check_u32_range("vectorizer", "faissBatch", self.faiss_batch, VECTORIZER_BATCH_MIN, VECTORIZER_BATCH_MAX)?;
        check_u32_range(
            "vectorizer",
            "minChunkLength",
            self.min_chunk_length,
            VECTORIZER_MIN_CHUNK_LENGTH_MIN,
            VECTORIZER_MIN_CHUNK_LENGTH_MAX,
        )?;
        check_u32_range(
            "vectorizer",
            "maxInFlightEmbed",
            self.max_in_flight_embed,
            VECTORIZER_MAX_IN_FLIGHT_MIN,
            VECTORIZER_MAX_IN_FLIGHT_MAX,
        )?;
        check_ms_range(
            "vectorizer",
            "requestTimeout",
            self.request_timeout_ms,
            VECTORIZER_TIMEOUT_MIN_MS,
            VECTORIZER_TIMEOUT_MAX_MS,
        )?;
        check_u32_range(
            "vectorizer",
            "breakerThreshold",
            self.breaker_threshold,
            VECTORIZER_BREAKER_THRESHOLD_MIN,
            VECTORIZER_BREAKER_THRESHOLD_MAX,
        )?;
        check_ms_range(
            "vectorizer",
            "breakerCooldown",
            self.breaker_cooldown_ms,
            VECTORIZER_BREAKER_COOLDOWN_MIN_MS,
            VECTORIZER_BREAKER_COOLDOWN_MAX_MS,
        )
    }
}

/// `embedder.tls.{cert,key,ca}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EmbedderTlsConfig {
    /// Client certificate path.
    pub cert: Option<PathBuf>,
    /// Client key path.
    pub key: Option<PathBuf>,
    /// CA bundle path.
    pub ca: Option<PathBuf>,
}

/// `embedder.*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EmbedderConfig {
    /// `embedder.endpoint` — EE connection URL.
    pub endpoint: String,
    /// `embedder.tls.*` — optional mutual-TLS material.
    pub tls: EmbedderTlsConfig,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8081".to_string(),
            tls: EmbedderTlsConfig::default(),
        }
    }
}

impl EmbedderConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigSchemaError::InvalidUrl {
                section: "embedder",
                field: "endpoint",
                url: self.endpoint.clone(),
            });
        }
        let has_cert = self.tls.cert.is_some();
        let has_key = self.tls.key.is_some();
        if has_cert != has_key {
            return Err(ConfigSchemaError::InvalidTlsConfig {
                section: "embedder",
                field: "tls",
                reason: "cert and key must be set together".to_string(),
            });
        }
        Ok(())
    }
}

/// `orchestrator.*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct OrchestratorConfig {
    /// `orchestrator.run_dir` — pidfiles, lock files, worker sockets.
    pub run_dir: PathBuf,
    /// `orchestrator.shutdown_timeout` (ms) before a worker is force-killed.
    pub shutdown_timeout_ms: u64,
    /// `orchestrator.max_backoff` (ms) cap on worker-restart backoff.
    pub max_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("run"),
            shutdown_timeout_ms: 10_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl OrchestratorConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        if self.run_dir.as_os_str().is_empty() {
            return Err(ConfigSchemaError::InvalidPath {
                section: "orchestrator",
                field: "runDir",
                path: self.run_dir.display().to_string(),
            });
        }
        check_ms_range(
            "orchestrator",
            "shutdownTimeout",
            self.shutdown_timeout_ms,
            ORCHESTRATOR_SHUTDOWN_TIMEOUT_MIN_MS,
            ORCHESTRATOR_SHUTDOWN_TIMEOUT_MAX_MS,
        )?;
        check_ms_range(
            "orchestrator",
            "maxBackoff",
            self.max_backoff_ms,
            ORCHESTRATOR_MAX_BACKOFF_MIN_MS,
            ORCHESTRATOR_MAX_BACKOFF_MAX_MS,
        )
    }
}

/// `workers.{file_watcher,indexer,vectorizer}.enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct WorkersConfig {
    /// Whether WO starts the File Watcher.
    pub file_watcher_enabled: bool,
    /// Whether WO starts the Indexing Worker.
    pub indexer_enabled: bool,
    /// Whether WO starts the Chunking/Vectorization Worker.
    pub vectorizer_enabled: bool,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            file_watcher_enabled: true,
            indexer_enabled: true,
            vectorizer_enabled: true,
        }
    }
}

/// Validated config wrapper carrying bounded numeric values.
#[derive(Debug, Clone)]
pub struct ValidatedPyIndexConfig {
    raw: PyIndexConfig,
    limits: ConfigLimits,
}

impl ValidatedPyIndexConfig {
    /// Borrow the raw (already validated) config.
    #[must_use]
    pub const fn raw(&self) -> &PyIndexConfig {
        &self.raw
    }

    /// Borrow the bounded-numeric limits view.
    #[must_use]
    pub const fn limits(&self) -> &ConfigLimits {
        &self.limits
    }
}

/// Bounded numeric values, guaranteed within range after validation.
#[derive(Debug, Clone, Copy)]
pub struct ConfigLimits {
    /// `indexer.batch_size`.
    pub indexer_batch_size: BoundedU32<INDEXER_BATCH_SIZE_MIN, INDEXER_BATCH_SIZE_MAX>,
    /// `indexer.max_failures_per_file`.
    pub indexer_max_failures_per_file: BoundedU32<INDEXER_MAX_FAILURES_MIN, INDEXER_MAX_FAILURES_MAX>,
    /// `vectorizer.max_in_flight_embed`.
    pub vectorizer_max_in_flight_embed: BoundedU32<VECTORIZER_MAX_IN_FLIGHT_MIN, VECTORIZER_MAX_IN_FLIGHT_MAX>,
    /// `vectorizer.breaker_threshold`.
    pub vectorizer_breaker_threshold: BoundedU32<VECTORIZER_BREAKER_THRESHOLD_MIN, VECTORIZER_BREAKER_THRESHOLD_MAX>,
    /// `vectorizer.breaker_cooldown` (ms).
    pub vectorizer_breaker_cooldown_ms: BoundedU64<VECTORIZER_BREAKER_COOLDOWN_MIN_MS, VECTORIZER_BREAKER_COOLDOWN_MAX_MS>,
    /// `orchestrator.shutdown_timeout` (ms).
    pub orchestrator_shutdown_timeout_ms:
        BoundedU64<ORCHESTRATOR_SHUTDOWN_TIMEOUT_MIN_MS, ORCHESTRATOR_SHUTDOWN_TIMEOUT_MAX_MS>,
}

impl ConfigLimits {
    fn new(config: &PyIndexConfig) -> Result<Self, ConfigSchemaError> {
        Ok(Self {
            indexer_batch_size: BoundedU32::new(config.indexer.batch_size).ok_or(
                ConfigSchemaError::LimitOutOfRange {
                    section: "indexer",
                    field: "batchSize",
                    value: u64::from(config.indexer.batch_size),
                    min: u64::from(INDEXER_BATCH_SIZE_MIN),
                    max: u64::from(INDEXER_BATCH_SIZE_MAX),
                },
            )?,
            indexer_max_failures_per_file: BoundedU32::new(config.indexer.max_failures_per_file).ok_or(
                ConfigSchemaError::LimitOutOfRange {
                    section: "indexer",
                    field: "maxFailuresPerFile",
                    value: u64::from(config.indexer.max_failures_per_file),
                    min: u64::from(INDEXER_MAX_FAILURES_MIN),
                    max: u64::from(INDEXER_MAX_FAILURES_MAX),
                },
            )?,
            vectorizer_max_in_flight_embed: BoundedU32::new(config.vectorizer.max_in_flight_embed).ok_or(
                ConfigSchemaError::LimitOutOfRange {
                    section: "vectorizer",
                    field: "maxInFlightEmbed",
                    value: u64::from(config.vectorizer.max_in_flight_embed),
                    min: u64::from(VECTORIZER_MAX_IN_FLIGHT_MIN),
                    max: u64::from(VECTORIZER_MAX_IN_FLIGHT_MAX),
                },
            )?,
            vectorizer_breaker_threshold: BoundedU32::new(config.vectorizer.breaker_threshold).ok_or(
                ConfigSchemaError::LimitOutOfRange {
                    section: "vectorizer",
                    field: "breakerThreshold",
                    value: u64::from(config.vectorizer.breaker_threshold),
                    min: u64::from(VECTORIZER_BREAKER_THRESHOLD_MIN),
                    max: u64::from(VECTORIZER_BREAKER_THRESHOLD_MAX),
                },
            )?,
            vectorizer_breaker_cooldown_ms: BoundedU64::new(config.vectorizer.breaker_cooldown_ms).ok_or(
                ConfigSchemaError::LimitOutOfRange {
                    section: "vectorizer",
                    field: "breakerCooldown",
                    value: config.vectorizer.breaker_cooldown_ms,
                    min: VECTORIZER_BREAKER_COOLDOWN_MIN_MS,
                    max: VECTORIZER_BREAKER_COOLDOWN_MAX_MS,
                },
            )?,
            orchestrator_shutdown_timeout_ms: BoundedU64::new(config.orchestrator.shutdown_timeout_ms).ok_or(
                ConfigSchemaError::LimitOutOfRange {
                    section: "orchestrator",
                    field: "shutdownTimeout",
                    value: config.orchestrator.shutdown_timeout_ms,
                    min: ORCHESTRATOR_SHUTDOWN_TIMEOUT_MIN_MS,
                    max: ORCHESTRATOR_SHUTDOWN_TIMEOUT_MAX_MS,
                },
            )?,
        })
    }
}

fn check_u32_range(section: &'static str, field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigSchemaError> {
    if value < min || value > max {
        return Err(ConfigSchemaError::LimitOutOfRange {
            section,
            field,
            value: u64::from(value),
            min: u64::from(min),
            max: u64::from(max),
        });
    }
    Ok(())
}

fn check_ms_range(section: &'static str, field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigSchemaError> {
    if value < min || value > max {
        return Err(ConfigSchemaError::TimeoutOutOfRange {
            section,
            field,
            value_ms: value,
            min_ms: min,
            max_ms: max,
        });
    }
    Ok(())
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// The config version is not supported by this binary.
    UnsupportedVersion {
        /// Version found in the config.
        found: u32,
        /// Version supported by this crate.
        supported: u32,
    },
    /// A duration value is out of bounds.
    TimeoutOutOfRange {
        /// Schema section (e.g. `indexer`).
        section: &'static str,
        /// Field name.
        field: &'static str,
        /// Value provided.
        value_ms: u64,
        /// Minimum allowed value.
        min_ms: u64,
        /// Maximum allowed value.
        max_ms: u64,
    },
    /// A numeric limit is out of bounds.
    LimitOutOfRange {
        /// Schema section (e.g. `vectorizer`).
        section: &'static str,
        /// Field name.
        field: &'static str,
        /// Value provided.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },
    /// A list field exceeds the maximum allowed size.
    ListTooLarge {
        /// Schema section (e.g. `watch`).
        section: &'static str,
        /// Field name.
        field: &'static str,
        /// Number of entries after normalization/deduplication.
        len: usize,
        /// Maximum allowed number of entries.
        max: usize,
    },
    /// A path field is empty or otherwise invalid.
    InvalidPath {
        /// Schema section (e.g. `storage`).
        section: &'static str,
        /// Field name.
        field: &'static str,
        /// Invalid path value.
        path: String,
    },
    /// A URL field is empty or otherwise invalid.
    InvalidUrl {
        /// Schema section (e.g. `embedder`).
        section: &'static str,
        /// Field name.
        field: &'static str,
        /// Invalid URL value.
        url: String,
    },
    /// The TLS cert/key/ca configuration is inconsistent.
    InvalidTlsConfig {
        /// Schema section (e.g. `embedder`).
        section: &'static str,
        /// Field name.
        field: &'static str,
        /// Human readable reason.
        reason: String,
    },
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found, supported } => write!(
                formatter,
                "unsupported config version {found} (supported: {supported})"
            ),
            Self::TimeoutOutOfRange { section, field, value_ms, min_ms, max_ms } => write!(
                formatter,
                "{section}.{field}={value_ms} out of range [{min_ms}, {max_ms}]"
            ),
            Self::LimitOutOfRange { section, field, value, min, max } => write!(
                formatter,
                "{section}.{field}={value} out of range [{min}, {max}]"
            ),
            Self::ListTooLarge { section, field, len, max } => write!(
                formatter,
                "{section}.{field} has {len} entries, exceeding max {max}"
            ),
            Self::InvalidPath { section, field, path } => {
                write!(formatter, "{section}.{field} is not a valid path: {path:?}")
            },
            Self::InvalidUrl { section, field, url } => {
                write!(formatter, "{section}.{field} is not a valid URL: {url:?}")
            },
            Self::InvalidTlsConfig { section, field, reason } => {
                write!(formatter, "{section}.{field} is invalid: {reason}")
            },
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::config_error()
    }
}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        Self::expected(code, message)
    }
}

/// Parse a [`PyIndexConfig`] from JSON text.
pub fn parse_config_json(text: &str) -> Result<PyIndexConfig, serde_json::Error> {
    serde_json::from_str(text)
}

/// Parse a [`PyIndexConfig`] from TOML text.
pub fn parse_config_toml(text: &str) -> Result<PyIndexConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Serialize a [`PyIndexConfig`] to a `BTreeMap` of dotted key paths, for
/// diagnostics (`pyindex config-check` surfaces this).
#[must_use]
pub fn flatten_to_dotted_keys(config: &PyIndexConfig) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert("storage.path".to_string(), config.storage.path.display().to_string());
    out.insert("storage.backup_dir".to_string(), config.storage.backup_dir.display().to_string());
    out.insert(
        "storage.request_socket".to_string(),
        config.storage.request_socket.display().to_string(),
    );
    out.insert("watch.scan_interval".to_string(), config.watch.scan_interval_secs.to_string());
    out.insert("watch.dirs".to_string(), config.watch.dirs.len().to_string());
    out.insert("indexer.batch_size".to_string(), config.indexer.batch_size.to_string());
    out.insert("vectorizer.chunk_batch".to_string(), config.vectorizer.chunk_batch.to_string());
    out.insert("embedder.endpoint".to_string(), config.embedder.endpoint.clone());
    out.insert("orchestrator.run_dir".to_string(), config.orchestrator.run_dir.display().to_string());
    out.insert("workers.file_watcher.enabled".to_string(), config.workers.file_watcher_enabled.to_string());
    out.insert("workers.indexer.enabled".to_string(), config.workers.indexer_enabled.to_string());
    out.insert("workers.vectorizer.enabled".to_string(), config.workers.vectorizer_enabled.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let validated = PyIndexConfig::default().validate_and_normalize().expect("defaults are valid");
        assert_eq!(validated.raw().version, CURRENT_CONFIG_VERSION);
    }

    #[test]
    fn rejects_unsupported_version() {
        let config = PyIndexConfig { version: 99, ..PyIndexConfig::default() };
        let error = config.validate_and_normalize().expect_err("should reject");
        assert!(matches!(error, ConfigSchemaError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn rejects_scan_interval_out_of_range() {
        let mut config = PyIndexConfig::default();
        config.watch.scan_interval_secs = 0;
        let error = config.validate_and_normalize().expect_err("should reject");
        assert!(matches!(error, ConfigSchemaError::TimeoutOutOfRange { section: "watch", .. }));
    }

    #[test]
    fn rejects_mismatched_tls_cert_and_key() {
        let mut config = PyIndexConfig::default();
        config.embedder.tls.cert = Some(PathBuf::from("cert.pem"));
        let error = config.validate_and_normalize().expect_err("should reject");
        assert!(matches!(error, ConfigSchemaError::InvalidTlsConfig { .. }));
    }

    #[test]
    fn ignore_patterns_are_deduplicated_and_sorted() {
        let mut config = PyIndexConfig::default();
        config.watch.ignore_patterns = vec!["b/*".to_string(), "a/*".to_string(), "a/*".to_string()];
        let validated = config.validate_and_normalize().expect("valid");
        assert_eq!(validated.raw().watch.ignore_patterns, vec!["a/*".to_string(), "b/*".to_string()]);
    }

    #[test]
    fn legacy_watch_dir_string_form_derives_id_from_path() {
        let entry = WatchDirEntry::from_legacy_string("/w");
        assert_eq!(entry.path, PathBuf::from("/w"));
        assert_eq!(entry.id, "/w");
    }

    #[test]
    fn flatten_to_dotted_keys_covers_every_recognized_key_group() {
        let flat = flatten_to_dotted_keys(&PyIndexConfig::default());
        for prefix in ["storage.", "watch.", "indexer.", "vectorizer.", "embedder.", "orchestrator.", "workers."] {
            assert!(flat.keys().any(|key| key.starts_with(prefix)), "missing {prefix}* key");
        }
    }
}
