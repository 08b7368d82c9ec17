use crate::cache::*;
use crate::common::TrackRef;
use crate::error::FlowExpectedError;
use crate::testing;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 3600);

fn entry(id: &str, rev: &str, tracks: &[&str]) -> CacheEntry {
    CacheEntry::new(id, rev, Utc::now(), tracks.iter().map(|t| TrackRef::new(*t, testing::day(1))).collect())
}

#[test]
fn test_missing_file_is_empty() {
    let temp_dir = testing::init();
    let cache = MetadataCache::load(temp_dir.path().join("playlists.json")).unwrap();
    assert!(cache.is_empty());
    assert!(cache.integrity_issue().is_none());
    assert!(!cache.is_dirty());
}

#[test]
fn test_flush_and_reload() {
    let temp_dir = testing::init();
    let path = temp_dir.path().join("nested").join("playlists.json");

    let mut cache = MetadataCache::load(&path).unwrap();
    cache.put(entry("p1", "rev-1", &["t1", "t2"]));
    cache.put(entry("p2", "rev-9", &[]));
    cache.flush().unwrap();
    assert!(!cache.is_dirty());
    assert!(path.exists());
    assert!(!temp_dir.path().join("nested").join("playlists.json.tmp").exists());

    let reloaded = MetadataCache::load(&path).unwrap();
    assert_eq!(reloaded.len(), 2);
    let p1 = reloaded.get("p1").unwrap();
    assert_eq!(p1.playlist_id, "p1");
    assert_eq!(p1.revision_token, "rev-1");
    assert_eq!(p1, cache.get("p1").unwrap());
}

#[test]
fn test_document_shape() {
    let temp_dir = testing::init();
    let path = temp_dir.path().join("playlists.json");
    let mut cache = MetadataCache::empty(&path);
    cache.put(entry("p1", "rev-1", &["t1"]));
    cache.flush().unwrap();

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["schema_version"], 1);
    assert_eq!(value["entries"]["p1"]["revision_token"], "rev-1");
    assert_eq!(value["entries"]["p1"]["tracks"][0]["track_id"], "t1");
    assert!(value["entries"]["p1"].get("playlist_id").is_none());
}

#[test]
fn test_schema_mismatch_rebuilds() {
    let temp_dir = testing::init();
    let path = temp_dir.path().join("playlists.json");
    fs::write(&path, r#"{"schema_version": 0, "entries": {"p1": {}}}"#).unwrap();

    let mut cache = MetadataCache::load(&path).unwrap();
    assert!(cache.is_empty());
    assert!(matches!(
        cache.integrity_issue(),
        Some(FlowExpectedError::CacheSchemaMismatch { expected: 1, got: 0, .. })
    ));

    // The stale document is replaced on the next flush.
    cache.flush().unwrap();
    let reloaded = MetadataCache::load(&path).unwrap();
    assert!(reloaded.integrity_issue().is_none());
}

#[test]
fn test_corrupt_file_rebuilds() {
    let temp_dir = testing::init();
    let path = temp_dir.path().join("playlists.json");
    fs::write(&path, "{not json").unwrap();

    let cache = MetadataCache::load(&path).unwrap();
    assert!(cache.is_empty());
    assert!(matches!(cache.integrity_issue(), Some(FlowExpectedError::CorruptCache { .. })));
}

#[test]
fn test_freshness() {
    let now = Utc::now();
    let mut e = entry("p1", "rev-1", &["t1"]);
    e.synced_at = now - ChronoDuration::hours(1);
    assert!(e.is_fresh("rev-1", DAY, now));
    assert!(!e.is_fresh("rev-2", DAY, now));

    e.synced_at = now - ChronoDuration::hours(25);
    assert!(!e.is_fresh("rev-1", DAY, now));

    // A zero TTL is always stale.
    e.synced_at = now;
    assert!(!e.is_fresh("rev-1", Duration::ZERO, now));
}

#[test]
fn test_get_fresh() {
    let temp_dir = testing::init();
    let mut cache = MetadataCache::empty(temp_dir.path().join("playlists.json"));
    cache.put(entry("p1", "rev-1", &["t1"]));
    let now = Utc::now();
    assert!(cache.get_fresh("p1", "rev-1", DAY, now).is_some());
    assert!(cache.get_fresh("p1", "rev-2", DAY, now).is_none());
    assert!(cache.get_fresh("p2", "rev-1", DAY, now).is_none());
}

#[test]
fn test_evict_missing() {
    let temp_dir = testing::init();
    let mut cache = MetadataCache::empty(temp_dir.path().join("playlists.json"));
    cache.put(entry("p1", "r", &[]));
    cache.put(entry("p2", "r", &[]));
    cache.put(entry("p3", "r", &[]));
    cache.flush().unwrap();

    let live: HashSet<&str> = ["p1", "p3"].into_iter().collect();
    let evicted = cache.evict_missing(&live);
    assert_eq!(evicted, vec!["p2".to_string()]);
    assert!(cache.is_dirty());
    assert!(cache.get("p2").is_none());
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_remove_marks_dirty() {
    let temp_dir = testing::init();
    let mut cache = MetadataCache::empty(temp_dir.path().join("playlists.json"));
    assert!(cache.remove("missing").is_none());
    assert!(!cache.is_dirty());
    cache.put(entry("p1", "r", &[]));
    cache.flush().unwrap();
    assert!(cache.remove("p1").is_some());
    assert!(cache.is_dirty());
}

#[test]
fn test_flush_failure_is_reported() {
    let temp_dir = testing::init();
    // The cache directory is a regular file, so it cannot be created.
    let blocker = temp_dir.path().join("blocker");
    fs::write(&blocker, "").unwrap();
    let mut cache = MetadataCache::empty(blocker.join("playlists.json"));
    cache.put(entry("p1", "r", &[]));
    let result = cache.flush_with_retry();
    assert!(matches!(result, Err(crate::error::FlowError::CacheWrite { .. })));
    assert!(cache.is_dirty());
}
