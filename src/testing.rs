use std::sync::Once;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::config::Config;
use crate::memory_store::MemoryStore;
use crate::retry::RetryConfig;

static INIT: Once = Once::new();

pub fn init() -> TempDir {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
    TempDir::new().expect("failed to create temp dir")
}

// Creates a config whose cache lives in the temp dir and whose retries never sleep.
pub fn config() -> (Config, TempDir) {
    let temp_dir = init();
    let config = Config {
        cache_dir: temp_dir.path().join("cache"),
        retry: RetryConfig::new(3, Duration::ZERO, Duration::ZERO),
        ..Config::default()
    };
    (config, temp_dir)
}

pub fn day(n: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2024, 1, n, 12, 0, 0).single()
}

// The Daily Mix scenario: one parent, one child, one track only in the child.
pub fn daily_mix_store() -> MemoryStore {
    let store = MemoryStore::new("me");
    store.add_playlist("p-collection", "🎵 Collection");
    store.add_playlist("p-daily", "Daily Mix 🎵");
    store.push_track("p-collection", "t0", day(1));
    store.push_track("p-daily", "t1", day(2));
    store
}
