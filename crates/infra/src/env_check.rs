//! Environment validation helpers for CLI surfaces.

use pyindex_config::{PyIndexConfig, PyIndexEnv, apply_env_overrides};
use pyindex_shared::ErrorEnvelope;
use std::collections::BTreeMap;

/// Infra-level error type (shared error envelope).
pub type InfraError = ErrorEnvelope;

/// Infra-level result type.
pub type InfraResult<T> = Result<T, InfraError>;

/// Validate that the provided env overrides can be parsed and merged into a
/// default config.
pub fn validate_env_parsing(env: &BTreeMap<String, String>) -> InfraResult<()> {
    let parsed = PyIndexEnv::from_map(env).map_err(|error| ErrorEnvelope::expected(error.error_code(), error.to_string()))?;
    let _ = apply_env_overrides(PyIndexConfig::default(), &parsed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_recognized_overrides() {
        let mut env = BTreeMap::new();
        env.insert("PYIDX_INDEXER_BATCH_SIZE".to_owned(), "8".to_owned());
        validate_env_parsing(&env).expect("valid override");
    }

    #[test]
    fn rejects_malformed_overrides() {
        let mut env = BTreeMap::new();
        env.insert("PYIDX_WORKERS_INDEXER_ENABLED".to_owned(), "maybe".to_owned());
        assert!(validate_env_parsing(&env).is_err());
    }
}
