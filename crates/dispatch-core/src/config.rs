//! Engine configuration.

use std::env;

use serde::{Deserialize, Serialize};

pub const ENV_DB_PATH: &str = "DISPATCH_DB_PATH";
pub const ENV_HISTORY_PAGE_SIZE: &str = "DISPATCH_HISTORY_PAGE_SIZE";
pub const ENV_HISTORY_MAX_PAGE_SIZE: &str = "DISPATCH_HISTORY_MAX_PAGE_SIZE";

/// Runtime settings for the reference ledger and history queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file
    pub database_path: String,
    /// Page size used when a history query asks for 0 items per page
    pub history_page_size: u32,
    /// Upper bound for history page sizes
    pub max_history_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "dispatch.sqlite3".to_string(),
            history_page_size: 10,
            max_history_page_size: 100,
        }
    }
}

impl EngineConfig {
    /// Load from `DISPATCH_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_path = lookup(ENV_DB_PATH)
            .filter(|path| !path.trim().is_empty())
            .unwrap_or(defaults.database_path);
        let max_history_page_size = lookup(ENV_HISTORY_MAX_PAGE_SIZE)
            .and_then(|v| v.trim().parse().ok())
            .filter(|size: &u32| *size > 0)
            .unwrap_or(defaults.max_history_page_size);
        let history_page_size = lookup(ENV_HISTORY_PAGE_SIZE)
            .and_then(|v| v.trim().parse().ok())
            .filter(|size: &u32| *size > 0)
            .unwrap_or(defaults.history_page_size)
            .min(max_history_page_size);

        Self {
            database_path,
            history_page_size,
            max_history_page_size,
        }
    }

    /// Resolve a requested page size: 0 means default, large values are capped.
    pub fn page_size(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.history_page_size
        } else {
            requested.min(self.max_history_page_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_values_from_lookup() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_DB_PATH, "/var/lib/farmacia/dispatch.db"),
            (ENV_HISTORY_PAGE_SIZE, "25"),
            (ENV_HISTORY_MAX_PAGE_SIZE, "50"),
        ]));

        assert_eq!(config.database_path, "/var/lib/farmacia/dispatch.db");
        assert_eq!(config.history_page_size, 25);
        assert_eq!(config.max_history_page_size, 50);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_HISTORY_PAGE_SIZE, "many"),
            (ENV_HISTORY_MAX_PAGE_SIZE, "0"),
        ]));

        assert_eq!(config.history_page_size, 10);
        assert_eq!(config.max_history_page_size, 100);
    }

    #[test]
    fn test_page_size_capped() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size(0), 10);
        assert_eq!(config.page_size(25), 25);
        assert_eq!(config.page_size(1000), 100);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"history_page_size": 20}"#).unwrap();
        assert_eq!(config.history_page_size, 20);
        assert_eq!(config.max_history_page_size, 100);
    }
}
