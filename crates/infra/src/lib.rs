//! # pyindex-infra
//!
//! Infrastructure wiring and runtime composition.
//! This crate depends on `app`, `adapters`, `config`, and `shared`.

/// Environment validation helpers used by CLI surfaces.
pub mod env_check;
/// Worker process supervision (spec.md §4.6).
pub mod orchestrator;
/// Storage Engine request broker wiring (spec.md §4.1, §6).
pub mod storage_broker;
/// Single-worker restart supervision.
pub mod supervisor;

pub use env_check::{InfraError, InfraResult, validate_env_parsing};
pub use orchestrator::{
    OrchestratorDeps, WorkerRole, build_worker_group, start_orchestrator, stop_orchestrator, tick,
};
pub use storage_broker::{bind as bind_storage_broker, run as run_storage_broker};
pub use supervisor::{BackoffPolicy, SupervisedWorker, WorkerGroup};

// Re-export redaction utilities for CLI boundary sanitization
pub use pyindex_shared::{is_secret_key, redact_if_secret};

/// Placeholder module for infrastructure wiring.
pub mod placeholder {
    /// Placeholder function to verify the crate compiles.
    #[must_use]
    pub const fn infra_crate_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

pub use placeholder::infra_crate_version;

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_adapters::adapters_crate_version;
    use pyindex_app::app_crate_version;
    use pyindex_config::config_crate_version;
    use pyindex_shared::shared_crate_version;

    fn workspace_deps() -> Vec<String> {
        let cargo_toml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let mut deps = Vec::new();
        let mut in_deps = false;
        let mut in_dev_deps = false;

        for raw_line in cargo_toml.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_deps = line == "[dependencies]";
                in_dev_deps = line == "[dev-dependencies]";
                continue;
            }
            if !(in_deps || in_dev_deps) {
                continue;
            }
            if line.starts_with("pyindex-") {
                let key = line.split('=').next().unwrap_or("").trim();
                let name = key.split('.').next().unwrap_or("").trim();
                deps.push(name.to_string());
            }
        }

        deps
    }

    #[test]
    fn infra_depends_on_app_adapters_config() {
        let deps = workspace_deps();
        let required = ["pyindex-app", "pyindex-adapters", "pyindex-config"];

        for expected in required {
            assert!(
                deps.iter().any(|dep| dep == expected),
                "missing dependency: {expected}"
            );
        }
    }

    #[test]
    fn infra_crate_compiles() {
        let version = infra_crate_version();
        assert!(!version.is_empty());
    }

    #[test]
    fn infra_can_use_app_adapters_config_shared() {
        let app_version = app_crate_version();
        let adapters_version = adapters_crate_version();
        let config_version = config_crate_version();
        let shared_version = shared_crate_version();

        assert!(!app_version.is_empty());
        assert!(!adapters_version.is_empty());
        assert!(!config_version.is_empty());
        assert!(!shared_version.is_empty());
    }
}
