use crate::config::*;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_minimal() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "").unwrap();

    let config = Config::parse(Some(&config_path)).unwrap();
    assert!(config.enabled);
    assert!(config.use_cache);
    assert!(config.keep_sources);
    assert!(config.skip_cycles);
    assert_eq!(config.cache_ttl, Duration::from_secs(24 * 3600));
    assert_eq!(config.batch_size, 100);
    assert_eq!(config.retry.max_retries, 8);
    assert_eq!(config.retry.initial_backoff, Duration::from_secs(1));
    assert_eq!(config.retry.max_backoff, Duration::from_secs(300));
    assert_eq!(config.batch_timeout, Duration::from_secs(60));
    assert_eq!(config.run_timeout, Duration::from_secs(300));
    assert_eq!(config.ignored_name_prefixes, vec!["🧪TEST_".to_string()]);
    assert!(config.source_filters.is_empty());
}

#[test]
fn test_config_full() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let cache_dir = temp_dir.path().join("cache");

    let config_content = format!(
        r#"
        enabled = false
        cache_dir = "{}"
        cache_ttl_hours = 6
        use_cache = false
        keep_sources = false
        skip_cycles = false
        source_filters = ["^Daily", "Mix$"]
        target_filters = ["Collection"]
        ignored_name_prefixes = ["DRAFT_", "🧪TEST_"]
        batch_size = 50
        max_retries = 3
        initial_backoff_ms = 10
        max_backoff_ms = 1000
        batch_timeout_secs = 5
        run_timeout_secs = 30
        "#,
        cache_dir.display()
    );
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::parse(Some(&config_path)).unwrap();
    assert!(!config.enabled);
    assert_eq!(config.cache_dir, cache_dir);
    assert_eq!(config.cache_path(), cache_dir.join("playlists.json"));
    assert_eq!(config.cache_ttl, Duration::from_secs(6 * 3600));
    assert!(!config.use_cache);
    assert!(!config.keep_sources);
    assert!(!config.skip_cycles);
    assert_eq!(config.source_filters.len(), 2);
    assert!(config.source_filters[0].is_match("Daily Mix 🎵"));
    assert!(config.target_filters[0].is_match("🎵 Collection"));
    assert_eq!(config.ignored_name_prefixes, vec!["DRAFT_".to_string(), "🧪TEST_".to_string()]);
    assert_eq!(config.batch_size, 50);
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.initial_backoff, Duration::from_millis(10));
    assert_eq!(config.retry.max_backoff, Duration::from_millis(1000));
    assert_eq!(config.batch_timeout, Duration::from_secs(5));
    assert_eq!(config.run_timeout, Duration::from_secs(30));
}

#[test]
fn test_config_expands_home() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, r#"cache_dir = "~/.cache/playflow-test""#).unwrap();

    let config = Config::parse(Some(&config_path)).unwrap();
    let home = dirs::home_dir().unwrap();
    assert_eq!(config.cache_dir, home.join(".cache/playflow-test"));
}

#[test]
fn test_config_not_found() {
    let result = Config::parse(Some(Path::new("/nonexistent/config.toml")));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_config_invalid_toml() {
    let result = Config::from_toml("batch_size = = 3", Path::new("config.toml"));
    assert!(matches!(result, Err(ConfigError::Decode { .. })));
}

#[test]
fn test_config_unknown_key() {
    let result = Config::from_toml("batchsize = 3", Path::new("config.toml"));
    assert!(matches!(result, Err(ConfigError::Decode { .. })));
}

#[test]
fn test_config_value_validation() {
    let path = Path::new("config.toml");

    let result = Config::from_toml("batch_size = 0", path);
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "batch_size"));

    let result = Config::from_toml("batch_size = -1", path);
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "batch_size"));

    let result = Config::from_toml("cache_ttl_hours = -2", path);
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "cache_ttl_hours"));

    let result = Config::from_toml("run_timeout_secs = 0", path);
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "run_timeout_secs"));

    let result = Config::from_toml("initial_backoff_ms = 5000\nmax_backoff_ms = 10", path);
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "max_backoff_ms"));

    let result = Config::from_toml(r#"ignored_name_prefixes = [""]"#, path);
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "ignored_name_prefixes"));
}

#[test]
fn test_config_ttl_overflow_rejected() {
    let result = Config::from_toml("cache_ttl_hours = 9223372036854775807", Path::new("config.toml"));
    match result {
        Err(ConfigError::InvalidValue { key, message, .. }) => {
            assert_eq!(key, "cache_ttl_hours");
            assert!(message.contains("too large"));
        }
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

#[test]
fn test_config_huge_timeouts_accepted() {
    let config = Config::from_toml(
        "run_timeout_secs = 9223372036854775807\nbatch_timeout_secs = 9223372036854775807",
        Path::new("config.toml"),
    )
    .unwrap();
    assert_eq!(config.run_timeout, Duration::from_secs(9223372036854775807));
    assert_eq!(config.batch_timeout, Duration::from_secs(9223372036854775807));
}

#[test]
fn test_config_invalid_filter() {
    let result = Config::from_toml(r#"target_filters = ["(unclosed"]"#, Path::new("config.toml"));
    match result {
        Err(ConfigError::InvalidValue { key, message, .. }) => {
            assert_eq!(key, "target_filters");
            assert!(message.contains("(unclosed"));
        }
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

#[test]
fn test_config_zero_ttl_allowed() {
    let config = Config::from_toml("cache_ttl_hours = 0", Path::new("config.toml")).unwrap();
    assert_eq!(config.cache_ttl, Duration::ZERO);
}
