//! Config loading for CLI surfaces: real process environment plus an
//! optional file path, deterministic merge order (spec.md §6).

use pyindex_config::{ValidatedPyIndexConfig, load_config_std_env};
use pyindex_shared::Result;
use std::path::Path;

/// Load the effective config from the real process environment and an
/// optional file path.
pub fn load_effective_config(config_path: Option<&Path>) -> Result<ValidatedPyIndexConfig> {
    load_config_std_env(config_path)
}
