//! Global key/value settings stored by the Storage Engine (spec.md §3).

use serde::{Deserialize, Serialize};

/// Well-known key for the persisted schema version (spec.md §4.1 step 6).
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// A single `(key, value)` row in the `db_settings` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSetting {
    /// Setting key.
    pub key: String,
    /// Setting value, stored as text.
    pub value: String,
}

impl DbSetting {
    /// Construct a setting row.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Construct the schema-version setting row.
    #[must_use]
    pub fn schema_version(version: impl Into<String>) -> Self {
        Self::new(SCHEMA_VERSION_KEY, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_setting_uses_well_known_key() {
        let setting = DbSetting::schema_version("7");
        assert_eq!(setting.key, SCHEMA_VERSION_KEY);
        assert_eq!(setting.value, "7");
    }
}
