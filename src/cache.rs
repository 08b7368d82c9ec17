//! The metadata cache persists each playlist's track list between runs so that unchanged playlists
//! are not refetched.
//!
//! # File Format
//!
//! A single JSON document, `playlists.json` in the cache directory:
//!
//! ```json
//! {"schema_version": 1,
//!  "entries": {"<playlist id>": {"revision_token": "...", "synced_at": "...", "tracks": [...]}}}
//! ```
//!
//! An entry is fresh while it is younger than the TTL and its revision token matches the live one.
//! A file with another schema version, or one that fails to parse, is discarded and the cache is
//! rebuilt from the remote store.
//!
//! # Atomic Writes
//!
//! The document is written to `playlists.json.tmp`, fsynced, renamed over the live file, and the
//! directory is fsynced. Readers see either the old or the new document.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::{PlaylistId, TrackRef};
use crate::error::{FlowError, FlowExpectedError, Result};

pub const SCHEMA_VERSION: u32 = 1;

const FLUSH_ATTEMPTS: u32 = 3;
const FLUSH_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Stored as the document's map key.
    #[serde(skip)]
    pub playlist_id: PlaylistId,
    pub revision_token: String,
    pub synced_at: DateTime<Utc>,
    pub tracks: Vec<TrackRef>,
}

impl CacheEntry {
    pub fn new(playlist_id: impl Into<String>, revision_token: impl Into<String>, synced_at: DateTime<Utc>, tracks: Vec<TrackRef>) -> Self {
        Self { playlist_id: playlist_id.into(), revision_token: revision_token.into(), synced_at, tracks }
    }

    pub fn is_fresh(&self, live_revision_token: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            // Larger than chrono can represent, so never expires by age.
            return self.revision_token == live_revision_token;
        };
        now - self.synced_at < ttl && self.revision_token == live_revision_token
    }
}

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    schema_version: u32,
    entries: BTreeMap<PlaylistId, CacheEntry>,
}

#[derive(Deserialize)]
struct VersionHeader {
    schema_version: u32,
}

#[derive(Debug)]
pub struct MetadataCache {
    path: PathBuf,
    entries: BTreeMap<PlaylistId, CacheEntry>,
    dirty: bool,
    integrity_issue: Option<FlowExpectedError>,
}

impl MetadataCache {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), entries: BTreeMap::new(), dirty: false, integrity_issue: None }
    }

    /// Load the cache document. A missing file yields an empty cache. An unreadable document yields
    /// an empty cache with [`MetadataCache::integrity_issue`] set; the next flush overwrites it.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let mut cache = Self::empty(path);
        let text = match fs::read_to_string(&cache.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no cache file at {}, starting empty", cache.path.display());
                return Ok(cache);
            }
            Err(e) => return Err(FlowError::Io(e)),
        };

        match parse_document(&cache.path, &text) {
            Ok(entries) => {
                debug!("loaded {} cache entries from {}", entries.len(), cache.path.display());
                cache.entries = entries;
            }
            Err(issue) => {
                warn!("discarding cache: {}", issue);
                cache.integrity_issue = Some(issue);
                // Rewrite even if nothing else changes, so the bad document does not linger.
                cache.dirty = true;
            }
        }
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn integrity_issue(&self) -> Option<&FlowExpectedError> {
        self.integrity_issue.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, playlist_id: &str) -> Option<&CacheEntry> {
        self.entries.get(playlist_id)
    }

    /// The entry for `playlist_id` if it may be used instead of refetching.
    pub fn get_fresh(&self, playlist_id: &str, live_revision_token: &str, ttl: Duration, now: DateTime<Utc>) -> Option<&CacheEntry> {
        self.get(playlist_id).filter(|e| e.is_fresh(live_revision_token, ttl, now))
    }

    pub fn put(&mut self, entry: CacheEntry) {
        self.dirty = true;
        self.entries.insert(entry.playlist_id.clone(), entry);
    }

    pub fn remove(&mut self, playlist_id: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(playlist_id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drop entries for playlists that no longer exist remotely. Returns the evicted ids.
    pub fn evict_missing(&mut self, live_ids: &HashSet<&str>) -> Vec<PlaylistId> {
        let evicted: Vec<PlaylistId> = self.entries.keys().filter(|id| !live_ids.contains(id.as_str())).cloned().collect();
        for id in &evicted {
            self.entries.remove(id);
        }
        if !evicted.is_empty() {
            self.dirty = true;
            info!("evicted {} cache entries for deleted playlists", evicted.len());
        }
        evicted
    }

    /// Write the document atomically. A clean cache is not rewritten.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let document = CacheDocument { schema_version: SCHEMA_VERSION, entries: self.entries.clone() };
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.path, &bytes).map_err(|source| FlowError::CacheWrite { path: self.path.clone(), source })?;
        self.dirty = false;
        debug!("flushed {} cache entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    /// [`MetadataCache::flush`] with a bounded number of attempts. The last failure is returned.
    pub fn flush_with_retry(&mut self) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.flush() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < FLUSH_ATTEMPTS => {
                    warn!("cache flush failed (attempt {}/{}): {}", attempt, FLUSH_ATTEMPTS, e);
                    std::thread::sleep(FLUSH_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_document(path: &Path, text: &str) -> std::result::Result<BTreeMap<PlaylistId, CacheEntry>, FlowExpectedError> {
    let corrupt = |e: serde_json::Error| FlowExpectedError::CorruptCache { path: path.to_path_buf(), message: e.to_string() };
    let header: VersionHeader = serde_json::from_str(text).map_err(corrupt)?;
    if header.schema_version != SCHEMA_VERSION {
        return Err(FlowExpectedError::CacheSchemaMismatch {
            path: path.to_path_buf(),
            expected: SCHEMA_VERSION,
            got: header.schema_version,
        });
    }
    let document: CacheDocument = serde_json::from_str(text).map_err(corrupt)?;
    Ok(document
        .entries
        .into_iter()
        .map(|(id, mut entry)| {
            entry.playlist_id = id.clone();
            (id, entry)
        })
        .collect())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = dir.join(tmp_name);

    let result = (|| {
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        fsync_dir(&dir)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    // Directories cannot be opened for syncing on Windows.
    if cfg!(windows) {
        return Ok(());
    }
    File::open(dir)?.sync_all()
}
