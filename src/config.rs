/// The config module loads the TOML configuration file and validates it into a [`Config`].
///
/// Every key is optional. Missing keys take the defaults below; unknown keys are rejected so that
/// typos do not silently fall back to defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::common::project_dirs;
use crate::retry::RetryConfig;

pub const CACHE_FILE_NAME: &str = "playlists.json";
pub const DEFAULT_TEST_PREFIX: &str = "🧪TEST_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found ({0})")]
    NotFound(PathBuf),
    #[error("Failed to read configuration file ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode configuration file ({path}): invalid TOML: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Invalid value for {key} in configuration file ({path}): {message}")]
    InvalidValue { key: String, path: PathBuf, message: String },
    #[error("Failed to determine the platform configuration directory")]
    NoConfigDir,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub enabled: bool,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub use_cache: bool,
    /// When false, tracks are removed from a child once every parent has received them.
    pub keep_sources: bool,
    pub skip_cycles: bool,
    pub source_filters: Vec<Regex>,
    pub target_filters: Vec<Regex>,
    pub ignored_name_prefixes: Vec<String>,
    pub batch_size: usize,
    pub retry: RetryConfig,
    pub batch_timeout: Duration,
    pub run_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: default_cache_dir(),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            use_cache: true,
            keep_sources: true,
            skip_cycles: true,
            source_filters: Vec::new(),
            target_filters: Vec::new(),
            ignored_name_prefixes: vec![DEFAULT_TEST_PREFIX.to_string()],
            batch_size: 100,
            retry: RetryConfig::default(),
            batch_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(300),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => std::env::temp_dir().join("playflow"),
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    enabled: Option<bool>,
    cache_dir: Option<String>,
    cache_ttl_hours: Option<i64>,
    use_cache: Option<bool>,
    keep_sources: Option<bool>,
    skip_cycles: Option<bool>,
    source_filters: Option<Vec<String>>,
    target_filters: Option<Vec<String>>,
    ignored_name_prefixes: Option<Vec<String>>,
    batch_size: Option<i64>,
    max_retries: Option<i64>,
    initial_backoff_ms: Option<i64>,
    max_backoff_ms: Option<i64>,
    batch_timeout_secs: Option<i64>,
    run_timeout_secs: Option<i64>,
}

impl Config {
    pub fn parse(config_path_override: Option<&Path>) -> Result<Config, ConfigError> {
        let path = match config_path_override {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ConfigError::NotFound(path)),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Self::from_toml(&text, &path)
    }

    /// Parse configuration text. `path` is only used in error messages.
    pub fn from_toml(text: &str, path: &Path) -> Result<Config, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| ConfigError::Decode {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;
        let invalid = |key: &str, message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            path: path.to_path_buf(),
            message,
        };

        let mut config = Config::default();
        if let Some(v) = raw.enabled {
            config.enabled = v;
        }
        if let Some(dir) = raw.cache_dir {
            if dir.trim().is_empty() {
                return Err(invalid("cache_dir", "must not be empty".to_string()));
            }
            config.cache_dir = PathBuf::from(shellexpand::tilde(&dir).into_owned());
        }
        if let Some(hours) = raw.cache_ttl_hours {
            let hours = non_negative(hours).ok_or_else(|| invalid("cache_ttl_hours", format!("must be a non-negative integer, got {hours}")))?;
            let secs = hours.checked_mul(60 * 60).ok_or_else(|| invalid("cache_ttl_hours", format!("{hours} hours is too large")))?;
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = raw.use_cache {
            config.use_cache = v;
        }
        if let Some(v) = raw.keep_sources {
            config.keep_sources = v;
        }
        if let Some(v) = raw.skip_cycles {
            config.skip_cycles = v;
        }
        if let Some(patterns) = raw.source_filters {
            config.source_filters = compile_filters(&patterns).map_err(|m| invalid("source_filters", m))?;
        }
        if let Some(patterns) = raw.target_filters {
            config.target_filters = compile_filters(&patterns).map_err(|m| invalid("target_filters", m))?;
        }
        if let Some(prefixes) = raw.ignored_name_prefixes {
            if prefixes.iter().any(|p| p.is_empty()) {
                return Err(invalid("ignored_name_prefixes", "prefixes must not be empty strings".to_string()));
            }
            config.ignored_name_prefixes = prefixes;
        }
        if let Some(size) = raw.batch_size {
            config.batch_size = positive(size).ok_or_else(|| invalid("batch_size", format!("must be a positive integer, got {size}")))? as usize;
        }
        if let Some(n) = raw.max_retries {
            let n = non_negative(n).ok_or_else(|| invalid("max_retries", format!("must be a non-negative integer, got {n}")))?;
            config.retry.max_retries = u32::try_from(n).map_err(|_| invalid("max_retries", format!("{n} is too large")))?;
        }
        if let Some(ms) = raw.initial_backoff_ms {
            let ms = non_negative(ms).ok_or_else(|| invalid("initial_backoff_ms", format!("must be a non-negative integer, got {ms}")))?;
            config.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.max_backoff_ms {
            let ms = non_negative(ms).ok_or_else(|| invalid("max_backoff_ms", format!("must be a non-negative integer, got {ms}")))?;
            config.retry.max_backoff = Duration::from_millis(ms);
        }
        if config.retry.max_backoff < config.retry.initial_backoff {
            return Err(invalid("max_backoff_ms", "must not be smaller than initial_backoff_ms".to_string()));
        }
        if let Some(secs) = raw.batch_timeout_secs {
            let secs = positive(secs).ok_or_else(|| invalid("batch_timeout_secs", format!("must be a positive integer, got {secs}")))?;
            config.batch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.run_timeout_secs {
            let secs = positive(secs).ok_or_else(|| invalid("run_timeout_secs", format!("must be a positive integer, got {secs}")))?;
            config.run_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }
}

fn non_negative(v: i64) -> Option<u64> {
    u64::try_from(v).ok()
}

fn positive(v: i64) -> Option<u64> {
    non_negative(v).filter(|v| *v > 0)
}

fn compile_filters(patterns: &[String]) -> Result<Vec<Regex>, String> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| format!("invalid regular expression {p:?}: {e}")))
        .collect()
}
