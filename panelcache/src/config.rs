use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::{CacheConfig, CacheError};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheSection,
    pub ttl: TtlSection,
    pub dashboard: DashboardSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Bounded wait for callers joining an in-flight fetch
    pub max_wait_ms: u64,
    /// Per-source deadline in composite fetches, unset means none
    pub source_timeout_ms: Option<u64>,
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlSection {
    /// TTL in seconds per cache key
    pub keys: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSection {
    pub recipe_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `plain`
    pub format: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_wait_ms: 3_000,
            source_timeout_ms: None,
            default_ttl_secs: 300,
        }
    }
}

impl Default for TtlSection {
    fn default() -> Self {
        let keys = [
            ("kpi", 300),
            ("dashboard.orders", 120),
            ("dashboard.tasks", 60),
            ("dashboard.inventory", 300),
            ("dashboard.recipes", 600),
        ]
        .into_iter()
        .map(|(key, secs)| (key.to_string(), secs))
        .collect();

        Self { keys }
    }
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self { recipe_limit: 50 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the cache cannot run with
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.cache.max_wait_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "cache.max_wait_ms must be greater than 0".to_string(),
            ));
        }
        if self.cache.source_timeout_ms == Some(0) {
            return Err(CacheError::InvalidConfig(
                "cache.source_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(CacheError::InvalidConfig(
                "cache.default_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if let Some((key, _)) = self.ttl.keys.iter().find(|(_, secs)| **secs == 0) {
            return Err(CacheError::InvalidConfig(format!(
                "ttl.keys.{} must be greater than 0",
                key
            )));
        }
        if self.dashboard.recipe_limit == 0 {
            return Err(CacheError::InvalidConfig(
                "dashboard.recipe_limit must be greater than 0".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "plain") {
            return Err(CacheError::InvalidConfig(format!(
                "logging.format must be json or plain, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Convert to CacheConfig
    pub fn to_cache_config(&self) -> CacheConfig {
        let mut config = CacheConfig::default()
            .with_max_wait(Duration::from_millis(self.cache.max_wait_ms))
            .with_default_ttl(Duration::from_secs(self.cache.default_ttl_secs));

        if let Some(ms) = self.cache.source_timeout_ms {
            config = config.with_source_timeout(Duration::from_millis(ms));
        }
        for (key, secs) in &self.ttl.keys {
            config = config.with_ttl(key.clone(), Duration::from_secs(*secs));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: AppConfig = serde_yaml::from_str("cache:\n  max_wait_ms: 500\n").unwrap();

        assert_eq!(config.cache.max_wait_ms, 500);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.ttl.keys["dashboard.tasks"], 60);
        assert_eq!(config.dashboard.recipe_limit, 50);
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let mut config = AppConfig::default();
        config.ttl.keys.insert("kpi".to_string(), 0);

        assert_eq!(
            config.validate().unwrap_err(),
            CacheError::InvalidConfig("ttl.keys.kpi must be greater than 0".to_string())
        );
    }
}
