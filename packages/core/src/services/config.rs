//! Hierarchy service configuration
//!
//! Defaults suit an embedded single-process deployment. Binaries may start
//! from [`HierarchyConfig::from_env`] to let operators override individual
//! values without a config file.

use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wait for the per-tenant mutation token (milliseconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Default deadline for any single public operation (milliseconds)
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// Default maximum id length in bytes
pub const DEFAULT_MAX_ID_LEN: usize = 40;

/// Configuration for the nested-set hierarchy service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HierarchyConfig {
    /// SQLite busy timeout set on every connection (default: 5000ms)
    pub busy_timeout_ms: u64,
    /// Maximum wait for the tenant mutation token before reporting a conflict (default: 5000ms)
    pub lock_timeout_ms: u64,
    /// Deadline applied to every public operation (default: 30s)
    pub operation_timeout_ms: u64,
    /// Re-check the whole tenant inside each mutation transaction before commit (default: false)
    pub verify_after_mutation: bool,
    /// Maximum id length in bytes (default: 40)
    pub max_id_len: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            verify_after_mutation: false,
            max_id_len: DEFAULT_MAX_ID_LEN,
        }
    }
}

impl HierarchyConfig {
    /// Defaults overridden by `HIERARCHY_*` environment variables
    ///
    /// Recognized: `HIERARCHY_BUSY_TIMEOUT_MS`, `HIERARCHY_LOCK_TIMEOUT_MS`,
    /// `HIERARCHY_OPERATION_TIMEOUT_MS`, `HIERARCHY_VERIFY_AFTER_MUTATION`,
    /// `HIERARCHY_MAX_ID_LEN`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            current: T,
        ) -> T {
            match lookup(key) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!("Ignoring unparseable {}='{}'", key, raw);
                    current
                }),
                None => current,
            }
        }

        let defaults = Self::default();
        Self {
            busy_timeout_ms: parse(
                &lookup,
                "HIERARCHY_BUSY_TIMEOUT_MS",
                defaults.busy_timeout_ms,
            ),
            lock_timeout_ms: parse(
                &lookup,
                "HIERARCHY_LOCK_TIMEOUT_MS",
                defaults.lock_timeout_ms,
            ),
            operation_timeout_ms: parse(
                &lookup,
                "HIERARCHY_OPERATION_TIMEOUT_MS",
                defaults.operation_timeout_ms,
            ),
            verify_after_mutation: parse(
                &lookup,
                "HIERARCHY_VERIFY_AFTER_MUTATION",
                defaults.verify_after_mutation,
            ),
            max_id_len: parse(&lookup, "HIERARCHY_MAX_ID_LEN", defaults.max_id_len),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = HierarchyConfig::default();
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.lock_timeout_ms, 5000);
        assert_eq!(config.operation_timeout_ms, 30_000);
        assert!(!config.verify_after_mutation);
        assert_eq!(config.max_id_len, 40);
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: HierarchyConfig =
            serde_json::from_str(r#"{"verifyAfterMutation": true, "lockTimeoutMs": 250}"#)
                .unwrap();
        assert!(config.verify_after_mutation);
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.operation_timeout_ms, DEFAULT_OPERATION_TIMEOUT_MS);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("HIERARCHY_LOCK_TIMEOUT_MS", "100"),
            ("HIERARCHY_VERIFY_AFTER_MUTATION", "true"),
            ("HIERARCHY_MAX_ID_LEN", "not-a-number"),
        ]);
        let config = HierarchyConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.lock_timeout_ms, 100);
        assert!(config.verify_after_mutation);
        assert_eq!(config.max_id_len, DEFAULT_MAX_ID_LEN);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }
}
