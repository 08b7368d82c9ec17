//! The remote collection store: the trait the engine talks to, its error taxonomy, and the
//! paginated fetch helpers.
//!
//! Errors are split by how the engine reacts to them:
//!
//! - **Transient** (rate limiting, 5xx, network): retried with backoff.
//! - **Permission**: the playlist is excluded from the run.
//! - **Auth**: the run aborts.
//! - Everything else is permanent for the affected playlist.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::common::{PlaylistDescriptor, TrackRef};
use crate::deadline::Deadline;
use crate::retry::{retry_with_backoff, RetryConfig, RetryResult};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const PLAYLIST_PAGE_SIZE: usize = 50;
pub const TRACK_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// HTTP 429. Usually carries a Retry-After hint.
    RateLimited,
    /// HTTP 5xx.
    Server,
    /// Connection failures and timeouts below the HTTP layer.
    Network,
    /// The user may not modify (or read) this playlist.
    Permission,
    /// Credentials were rejected. Never retried.
    Auth,
    NotFound,
    Permanent,
}

impl RemoteErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteErrorKind::RateLimited | RemoteErrorKind::Server | RemoteErrorKind::Network)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    /// How long the store asked us to wait before the next attempt.
    pub retry_after: Option<Duration>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "remote error (HTTP {}): {}", code, self.message),
            None => write!(f, "remote error: {}", self.message),
        }
    }
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self { kind, status_code: None, message: message.into(), retry_after: None }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self { retry_after, ..Self::new(RemoteErrorKind::RateLimited, message).with_status(429) }
    }

    pub fn server(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Server, message).with_status(status_code)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permission, message).with_status(403)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Auth, message).with_status(401)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message).with_status(404)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permanent, message)
    }

    /// Classify an HTTP status the way the store's API documents it.
    pub fn from_status(status_code: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let kind = match status_code {
            429 => RemoteErrorKind::RateLimited,
            500..=599 => RemoteErrorKind::Server,
            401 => RemoteErrorKind::Auth,
            403 => RemoteErrorKind::Permission,
            404 => RemoteErrorKind::NotFound,
            _ => RemoteErrorKind::Permanent,
        };
        Self { kind, status_code: Some(status_code), message: message.into(), retry_after }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Offset of the next page, or None on the last page.
    pub next_offset: Option<usize>,
}

/// A raw item from a playlist's track listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// None for removed or unavailable tracks.
    pub track_id: Option<String>,
    pub is_local: bool,
    pub added_at: Option<DateTime<Utc>>,
    pub added_by: Option<String>,
}

impl RemoteTrack {
    pub fn new(track_id: impl Into<String>, added_at: Option<DateTime<Utc>>) -> Self {
        Self { track_id: Some(track_id.into()), is_local: false, added_at, added_by: None }
    }
}

/// The remote collection API. Implementations are synchronous; the engine drives them one call at
/// a time.
pub trait CollectionStore {
    /// Identity of the authenticated user. Only playlists owned by this user are modified.
    fn current_user(&self) -> RemoteResult<String>;

    fn list_playlists(&self, offset: usize, limit: usize) -> RemoteResult<Page<PlaylistDescriptor>>;

    fn fetch_tracks(&self, playlist_id: &str, offset: usize, limit: usize) -> RemoteResult<Page<RemoteTrack>>;

    fn revision_token(&self, playlist_id: &str) -> RemoteResult<String>;

    /// Append tracks. Returns the new revision token when the store reports one.
    fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> RemoteResult<Option<String>>;

    /// Remove every occurrence of the given tracks. Returns the new revision token when reported.
    fn remove_tracks(&self, playlist_id: &str, track_ids: &[String]) -> RemoteResult<Option<String>>;

    /// Largest number of tracks accepted by a single add or remove call.
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }
}

/// Drop unusable items and collapse duplicate ids to their first occurrence.
pub fn normalize_tracks(items: Vec<RemoteTrack>) -> Vec<TrackRef> {
    let mut seen = std::collections::HashSet::new();
    let mut tracks = Vec::with_capacity(items.len());
    for item in items {
        if item.is_local {
            continue;
        }
        let Some(track_id) = item.track_id else {
            continue;
        };
        if track_id.is_empty() || !seen.insert(track_id.clone()) {
            continue;
        }
        tracks.push(TrackRef { track_id, added_at: item.added_at, added_by: item.added_by });
    }
    tracks
}

/// A store wrapped with the run's retry policy and deadline. Every call gets a fresh batch budget.
pub struct RemoteCalls<'a, S: CollectionStore + ?Sized> {
    store: &'a S,
    retry: RetryConfig,
    batch_timeout: Duration,
    deadline: &'a Deadline,
}

impl<'a, S: CollectionStore + ?Sized> RemoteCalls<'a, S> {
    pub fn new(store: &'a S, retry: RetryConfig, batch_timeout: Duration, deadline: &'a Deadline) -> Self {
        Self { store, retry, batch_timeout, deadline }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn deadline(&self) -> &'a Deadline {
        self.deadline
    }

    pub fn call<T, F>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut(&S) -> RemoteResult<T>,
    {
        let budget = self.deadline.batch_budget(self.batch_timeout);
        retry_with_backoff(&self.retry, &budget, || operation(self.store))
    }

    pub fn fetch_all_playlists(&self) -> RemoteResult<Vec<PlaylistDescriptor>> {
        let mut playlists = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.call(|s| s.list_playlists(offset, PLAYLIST_PAGE_SIZE)).into_result()?;
            let fetched = page.items.len();
            playlists.extend(page.items);
            match next_offset(offset, fetched, page.next_offset) {
                Some(next) => offset = next,
                None => break,
            }
        }
        debug!("listed {} playlists", playlists.len());
        Ok(playlists)
    }

    pub fn fetch_all_tracks(&self, playlist_id: &str) -> RemoteResult<Vec<TrackRef>> {
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.call(|s| s.fetch_tracks(playlist_id, offset, TRACK_PAGE_SIZE)).into_result()?;
            let fetched = page.items.len();
            items.extend(page.items);
            match next_offset(offset, fetched, page.next_offset) {
                Some(next) => offset = next,
                None => break,
            }
        }
        let raw = items.len();
        let tracks = normalize_tracks(items);
        if tracks.len() != raw {
            debug!("dropped {} unusable or duplicate items from playlist {}", raw - tracks.len(), playlist_id);
        }
        Ok(tracks)
    }
}

fn next_offset(offset: usize, fetched: usize, reported: Option<usize>) -> Option<usize> {
    let next = reported?;
    if fetched == 0 || next <= offset {
        warn!("store reported a non-advancing page offset {} after {}; stopping pagination", next, offset);
        return None;
    }
    Some(next)
}
