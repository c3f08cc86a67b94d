//! Config loading helpers (file + env, deterministic merge order).
//!
//! The loader is responsible for deterministic merge order and surfacing
//! user-facing errors as typed `ErrorEnvelope`s.

use crate::{PyIndexConfig, PyIndexEnv, ValidatedPyIndexConfig, apply_env_overrides};
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Load config from an optional source file, then apply env overrides and
/// validate.
///
/// Precedence (highest wins): env overrides, then file content, then
/// `PyIndexConfig::default()`.
pub fn load_config_from_path(
    config_path: Option<&Path>,
    env: &PyIndexEnv,
) -> Result<ValidatedPyIndexConfig, ErrorEnvelope> {
    let config = match config_path {
        None => PyIndexConfig::default(),
        Some(path) => {
            let text = read_config_file(path)?;
            let format = detect_config_format(path)?;
            parse_config_unvalidated(&text, format)?
        },
    };

    apply_env_overrides(config, env).map_err(ErrorEnvelope::from)
}

/// Load config from the real process environment and an optional file path.
pub fn load_config_std_env(config_path: Option<&Path>) -> Result<ValidatedPyIndexConfig, ErrorEnvelope> {
    let env = PyIndexEnv::from_std_env().map_err(|error| {
        ErrorEnvelope::expected(error.error_code(), error.to_string())
    })?;
    load_config_from_path(config_path, &env)
}

/// Serialize the config as deterministic pretty JSON (with trailing newline).
pub fn to_pretty_json(config: &PyIndexConfig) -> Result<String, ErrorEnvelope> {
    let mut output = serde_json::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to serialize config: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

/// Serialize the config as deterministic pretty TOML (with trailing newline).
pub fn to_pretty_toml(config: &PyIndexConfig) -> Result<String, ErrorEnvelope> {
    let mut output = toml::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::new("pyindex", "serialize_toml"),
            format!("failed to serialize config TOML: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

fn parse_config_unvalidated(input: &str, format: ConfigFormat) -> Result<PyIndexConfig, ErrorEnvelope> {
    match format {
        ConfigFormat::Json => serde_json::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(ErrorCode::config_error(), format!("invalid config JSON: {error}"))
                .with_metadata("source", "config")
        }),
        ConfigFormat::Toml => toml::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(ErrorCode::config_error(), format!("invalid config TOML: {error}"))
                .with_metadata("source", "config")
        }),
    }
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        ErrorEnvelope::expected(ErrorCode::config_error(), format!("failed to read config file: {error}"))
            .with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn detect_config_format(path: &Path) -> Result<ConfigFormat, ErrorEnvelope> {
    let ext = path.extension().and_then(|value| value.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        None | Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(other) => Err(
            ErrorEnvelope::expected(ErrorCode::config_error(), "unsupported config format; use .json or .toml")
                .with_metadata("extension", other.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let root = std::env::temp_dir().join("pyindex_config_test").join(name);
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).expect("create scratch dir");
        root
    }

    #[test]
    fn loads_defaults_when_no_path_given() {
        let env = PyIndexEnv::default();
        let validated = load_config_from_path(None, &env).expect("defaults are valid");
        assert_eq!(validated.raw().version, crate::CURRENT_CONFIG_VERSION);
    }

    #[test]
    fn loads_json_file_and_applies_env_override() {
        let dir = scratch_dir("loads_json_file_and_applies_env_override");
        let file_path = dir.join("config.json");
        fs::write(&file_path, r#"{"version": 1, "watch": {"scanIntervalSecs": 30}}"#)
            .expect("write temp config");

        let mut env_map = std::collections::BTreeMap::new();
        env_map.insert("PYIDX_INDEXER_BATCH_SIZE".to_string(), "7".to_string());
        let env = PyIndexEnv::from_map(&env_map).expect("valid env");

        let validated = load_config_from_path(Some(&file_path), &env).expect("loads");
        assert_eq!(validated.raw().watch.scan_interval_secs, 30);
        assert_eq!(validated.raw().indexer.batch_size, 7);
    }

    #[test]
    fn rejects_unsupported_extension() {
        let dir = scratch_dir("rejects_unsupported_extension");
        let file_path = dir.join("config.yaml");
        fs::write(&file_path, "version: 1").expect("write temp config");

        let env = PyIndexEnv::default();
        let error = load_config_from_path(Some(&file_path), &env).expect_err("should reject");
        assert_eq!(error.code, ErrorCode::config_error());
    }
}
