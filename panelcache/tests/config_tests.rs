// Configuration Module Tests
// Tests for AppConfig, loading, defaults, validation and conversions

use panelcache::{AppConfig, CacheError};
use std::fs;
use std::time::Duration;

#[test]
fn test_config_default_values() {
    let config = AppConfig::default();

    // Cache defaults
    assert_eq!(config.cache.max_wait_ms, 3_000);
    assert_eq!(config.cache.source_timeout_ms, None);
    assert_eq!(config.cache.default_ttl_secs, 300);

    // Per-key TTL defaults
    assert_eq!(config.ttl.keys["kpi"], 300);
    assert_eq!(config.ttl.keys["dashboard.orders"], 120);
    assert_eq!(config.ttl.keys["dashboard.tasks"], 60);
    assert_eq!(config.ttl.keys["dashboard.inventory"], 300);
    assert_eq!(config.ttl.keys["dashboard.recipes"], 600);

    // Dashboard defaults
    assert_eq!(config.dashboard.recipe_limit, 50);

    // Logging defaults
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_config_to_cache_config() {
    let config = AppConfig::default();
    let cache_config = config.to_cache_config();

    assert_eq!(cache_config.max_wait, Duration::from_secs(3));
    assert_eq!(cache_config.source_timeout, None);
    assert_eq!(cache_config.default_ttl, Duration::from_secs(300));
    assert_eq!(cache_config.ttl_for("dashboard.tasks"), Duration::from_secs(60));
    assert_eq!(cache_config.ttl_for("unknown.key"), Duration::from_secs(300));
}

#[test]
fn test_config_from_file() {
    let temp_config = r#"
cache:
  max_wait_ms: 1500
  source_timeout_ms: 800
  default_ttl_secs: 90
ttl:
  keys:
    kpi: 30
    dashboard.orders: 45
dashboard:
  recipe_limit: 10
logging:
  level: "debug"
  format: "plain"
"#;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("panelcache.yml");
    fs::write(&path, temp_config).unwrap();

    let config = AppConfig::from_file(&path).unwrap();

    assert_eq!(config.cache.max_wait_ms, 1500);
    assert_eq!(config.cache.source_timeout_ms, Some(800));
    assert_eq!(config.dashboard.recipe_limit, 10);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "plain");

    // A ttl.keys map replaces the default map
    assert_eq!(config.ttl.keys.len(), 2);

    let cache_config = config.to_cache_config();
    assert_eq!(cache_config.max_wait, Duration::from_millis(1500));
    assert_eq!(cache_config.source_timeout, Some(Duration::from_millis(800)));
    assert_eq!(cache_config.ttl_for("kpi"), Duration::from_secs(30));
    assert_eq!(cache_config.ttl_for("dashboard.orders"), Duration::from_secs(45));
    assert_eq!(cache_config.ttl_for("dashboard.tasks"), Duration::from_secs(90));
}

#[test]
fn test_config_partial_file_uses_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"logging:\n  level: warn\n").unwrap();

    let config = AppConfig::from_file(file.path()).unwrap();

    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.cache.max_wait_ms, 3_000);
    assert_eq!(config.ttl.keys.len(), 5);
}

#[test]
fn test_config_missing_file() {
    assert!(AppConfig::from_file("/nonexistent/panelcache.yml").is_err());
}

#[test]
fn test_config_invalid_yaml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"cache: [not, a, map").unwrap();

    assert!(AppConfig::from_file(file.path()).is_err());
}

#[test]
fn test_config_rejects_invalid_values() {
    let mut config = AppConfig::default();
    config.cache.max_wait_ms = 0;
    assert!(matches!(
        config.validate(),
        Err(CacheError::InvalidConfig(ref message)) if message.contains("max_wait_ms")
    ));

    let mut config = AppConfig::default();
    config.cache.source_timeout_ms = Some(0);
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.logging.format = "xml".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.dashboard.recipe_limit = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_file_with_invalid_values_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"ttl:\n  keys:\n    kpi: 0\n").unwrap();

    let err = AppConfig::from_file(file.path()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<CacheError>(),
        Some(&CacheError::InvalidConfig(
            "ttl.keys.kpi must be greater than 0".to_string()
        ))
    );
}

#[test]
fn test_config_yaml_roundtrip() {
    let config = AppConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();
    let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();

    assert_eq!(parsed.ttl.keys, config.ttl.keys);
    assert_eq!(parsed.cache.max_wait_ms, config.cache.max_wait_ms);
}
