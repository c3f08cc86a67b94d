//! # pyindex-config
//!
//! Configuration schema, validation, and normalization logic for the
//! storage engine, workers, and orchestrator. This crate depends on
//! `domain` and `shared` only.

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (env + file + overrides).
pub mod load;
/// Configuration schema types and helpers.
pub mod schema;

pub use schema::{
    CURRENT_CONFIG_VERSION, ConfigLimits, ConfigSchemaError, EmbedderConfig, EmbedderTlsConfig,
    IndexerConfig, OrchestratorConfig, PyIndexConfig, StorageConfig, ValidatedPyIndexConfig,
    VectorizerConfig, WatchConfig, WatchDirEntry, WorkersConfig, flatten_to_dotted_keys,
    parse_config_json, parse_config_toml,
};

pub use env::{EnvParseError, PyIndexEnv, apply_env_overrides};
pub use load::{load_config_from_path, load_config_std_env, to_pretty_json, to_pretty_toml};

/// Returns the config crate version.
#[must_use]
pub const fn config_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
