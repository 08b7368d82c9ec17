//! An in-memory [`CollectionStore`].
//!
//! Useful for dry runs and for tests: it paginates like a real store, bumps revision tokens on every
//! write, enforces ownership and batch limits, records every call, and can be scripted to fail.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::common::{Classification, PlaylistDescriptor};
use crate::remote::{CollectionStore, Page, RemoteError, RemoteResult, RemoteTrack, DEFAULT_MAX_BATCH_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    CurrentUser,
    ListPlaylists,
    FetchTracks,
    RevisionToken,
    AddTracks,
    RemoveTracks,
}

#[derive(Debug, Clone)]
struct MemoryPlaylist {
    name: String,
    owner: String,
    revision: u64,
    tracks: Vec<RemoteTrack>,
    classification: Classification,
}

#[derive(Debug)]
struct ScriptedFailure {
    operation: Operation,
    playlist_id: Option<String>,
    error: RemoteError,
}

#[derive(Debug, Default)]
struct MemoryState {
    user: String,
    // Insertion order is the listing order.
    order: Vec<String>,
    playlists: BTreeMap<String, MemoryPlaylist>,
    failures: VecDeque<ScriptedFailure>,
    calls: Vec<(Operation, Option<String>)>,
    next_revision: u64,
    max_batch_size: usize,
    report_revisions: bool,
    list_revisions: bool,
}

#[derive(Debug)]
pub struct MemoryStore {
    state: RefCell<MemoryState>,
}

impl MemoryStore {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            state: RefCell::new(MemoryState {
                user: user.into(),
                max_batch_size: DEFAULT_MAX_BATCH_SIZE,
                report_revisions: true,
                list_revisions: true,
                ..MemoryState::default()
            }),
        }
    }

    pub fn with_max_batch_size(self, max_batch_size: usize) -> Self {
        self.state.borrow_mut().max_batch_size = max_batch_size;
        self
    }

    /// Make writes return no revision token, forcing callers to ask for it.
    pub fn without_write_revisions(self) -> Self {
        self.state.borrow_mut().report_revisions = false;
        self
    }

    /// Make listings carry empty revision tokens, forcing callers to ask for them.
    pub fn without_listed_revisions(self) -> Self {
        self.state.borrow_mut().list_revisions = false;
        self
    }

    /// Add a playlist owned by the current user.
    pub fn add_playlist(&self, id: &str, name: &str) {
        let user = self.state.borrow().user.clone();
        self.add_foreign_playlist(id, name, &user);
    }

    pub fn add_foreign_playlist(&self, id: &str, name: &str, owner: &str) {
        let mut state = self.state.borrow_mut();
        let revision = state.bump();
        state.order.push(id.to_string());
        state.playlists.insert(
            id.to_string(),
            MemoryPlaylist {
                name: name.to_string(),
                owner: owner.to_string(),
                revision,
                tracks: Vec::new(),
                classification: Classification::Unclassified,
            },
        );
    }

    pub fn set_classification(&self, id: &str, classification: Classification) {
        if let Some(p) = self.state.borrow_mut().playlists.get_mut(id) {
            p.classification = classification;
        }
    }

    pub fn delete_playlist(&self, id: &str) {
        let mut state = self.state.borrow_mut();
        state.playlists.remove(id);
        state.order.retain(|x| x != id);
    }

    /// Append a track as if a user had added it, bumping the revision.
    pub fn push_track(&self, playlist_id: &str, track_id: &str, added_at: Option<DateTime<Utc>>) {
        self.push_item(playlist_id, RemoteTrack::new(track_id, added_at));
    }

    pub fn push_item(&self, playlist_id: &str, item: RemoteTrack) {
        let mut state = self.state.borrow_mut();
        let revision = state.bump();
        if let Some(p) = state.playlists.get_mut(playlist_id) {
            p.tracks.push(item);
            p.revision = revision;
        }
    }

    pub fn track_ids(&self, playlist_id: &str) -> Vec<String> {
        self.state
            .borrow()
            .playlists
            .get(playlist_id)
            .map(|p| p.tracks.iter().filter_map(|t| t.track_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn tracks(&self, playlist_id: &str) -> Vec<RemoteTrack> {
        self.state.borrow().playlists.get(playlist_id).map(|p| p.tracks.clone()).unwrap_or_default()
    }

    /// Fail the next `times` calls of `operation` (optionally only for one playlist) with `error`.
    pub fn fail_next(&self, operation: Operation, playlist_id: Option<&str>, error: RemoteError, times: usize) {
        let mut state = self.state.borrow_mut();
        for _ in 0..times {
            state.failures.push_back(ScriptedFailure {
                operation,
                playlist_id: playlist_id.map(|s| s.to_string()),
                error: error.clone(),
            });
        }
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.state.borrow().calls.iter().filter(|(op, _)| *op == operation).count()
    }

    pub fn calls_for(&self, operation: Operation, playlist_id: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|(op, id)| *op == operation && id.as_deref() == Some(playlist_id))
            .count()
    }

    pub fn reset_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    fn enter(&self, operation: Operation, playlist_id: Option<&str>) -> RemoteResult<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push((operation, playlist_id.map(|s| s.to_string())));
        let position = state.failures.iter().position(|f| {
            f.operation == operation && (f.playlist_id.is_none() || f.playlist_id.as_deref() == playlist_id)
        });
        match position.and_then(|i| state.failures.remove(i)) {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }

    fn write<F>(&self, operation: Operation, playlist_id: &str, track_ids: &[String], apply: F) -> RemoteResult<Option<String>>
    where
        F: FnOnce(&mut Vec<RemoteTrack>, &str),
    {
        self.enter(operation, Some(playlist_id))?;
        let mut state = self.state.borrow_mut();
        if track_ids.len() > state.max_batch_size {
            return Err(RemoteError::from_status(
                400,
                format!("batch of {} exceeds the limit of {}", track_ids.len(), state.max_batch_size),
                None,
            ));
        }
        let user = state.user.clone();
        let revision = state.bump();
        let report = state.report_revisions;
        let playlist = state
            .playlists
            .get_mut(playlist_id)
            .ok_or_else(|| RemoteError::not_found(format!("playlist {playlist_id} not found")))?;
        if playlist.owner != user {
            return Err(RemoteError::permission(format!("playlist {playlist_id} is owned by {}", playlist.owner)));
        }
        apply(&mut playlist.tracks, &user);
        playlist.revision = revision;
        Ok(report.then(|| revision_token(revision)))
    }
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

fn revision_token(revision: u64) -> String {
    format!("rev-{revision}")
}

impl CollectionStore for MemoryStore {
    fn current_user(&self) -> RemoteResult<String> {
        self.enter(Operation::CurrentUser, None)?;
        Ok(self.state.borrow().user.clone())
    }

    fn list_playlists(&self, offset: usize, limit: usize) -> RemoteResult<Page<PlaylistDescriptor>> {
        self.enter(Operation::ListPlaylists, None)?;
        let state = self.state.borrow();
        let items: Vec<PlaylistDescriptor> = state
            .order
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| {
                let p = state.playlists.get(id)?;
                Some(PlaylistDescriptor {
                    id: id.clone(),
                    name: p.name.clone(),
                    owner: p.owner.clone(),
                    revision_token: if state.list_revisions { revision_token(p.revision) } else { String::new() },
                    track_count: p.tracks.len(),
                    classification: p.classification.clone(),
                })
            })
            .collect();
        let end = offset + limit;
        let next_offset = (end < state.order.len()).then_some(end);
        Ok(Page { items, next_offset })
    }

    fn fetch_tracks(&self, playlist_id: &str, offset: usize, limit: usize) -> RemoteResult<Page<RemoteTrack>> {
        self.enter(Operation::FetchTracks, Some(playlist_id))?;
        let state = self.state.borrow();
        let p = state
            .playlists
            .get(playlist_id)
            .ok_or_else(|| RemoteError::not_found(format!("playlist {playlist_id} not found")))?;
        let items = p.tracks.iter().skip(offset).take(limit).cloned().collect();
        let end = offset + limit;
        let next_offset = (end < p.tracks.len()).then_some(end);
        Ok(Page { items, next_offset })
    }

    fn revision_token(&self, playlist_id: &str) -> RemoteResult<String> {
        self.enter(Operation::RevisionToken, Some(playlist_id))?;
        let state = self.state.borrow();
        state
            .playlists
            .get(playlist_id)
            .map(|p| revision_token(p.revision))
            .ok_or_else(|| RemoteError::not_found(format!("playlist {playlist_id} not found")))
    }

    fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> RemoteResult<Option<String>> {
        self.write(Operation::AddTracks, playlist_id, track_ids, |tracks, user| {
            let now = Utc::now();
            for id in track_ids {
                tracks.push(RemoteTrack {
                    track_id: Some(id.clone()),
                    is_local: false,
                    added_at: Some(now),
                    added_by: Some(user.to_string()),
                });
            }
        })
    }

    fn remove_tracks(&self, playlist_id: &str, track_ids: &[String]) -> RemoteResult<Option<String>> {
        self.write(Operation::RemoveTracks, playlist_id, track_ids, |tracks, _| {
            tracks.retain(|t| t.track_id.as_ref().map_or(true, |id| !track_ids.contains(id)));
        })
    }

    fn max_batch_size(&self) -> usize {
        self.state.borrow().max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginates_listing() {
        let store = MemoryStore::new("me");
        for i in 0..5 {
            store.add_playlist(&format!("p{i}"), &format!("Playlist {i}"));
        }
        let first = store.list_playlists(0, 2).unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_offset, Some(2));
        let last = store.list_playlists(4, 2).unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.next_offset, None);
    }

    #[test]
    fn writes_bump_revision() {
        let store = MemoryStore::new("me");
        store.add_playlist("p", "🎵 P");
        let before = store.revision_token("p").unwrap();
        let reported = store.add_tracks("p", &["t1".to_string()]).unwrap();
        let after = store.revision_token("p").unwrap();
        assert_ne!(before, after);
        assert_eq!(reported, Some(after));
        assert_eq!(store.track_ids("p"), vec!["t1"]);
    }

    #[test]
    fn foreign_playlists_reject_writes() {
        let store = MemoryStore::new("me");
        store.add_foreign_playlist("p", "🎵 Theirs", "someone-else");
        let err = store.add_tracks("p", &["t1".to_string()]).unwrap_err();
        assert_eq!(err.kind, crate::remote::RemoteErrorKind::Permission);
    }

    #[test]
    fn scripted_failures_are_consumed_in_order() {
        let store = MemoryStore::new("me");
        store.add_playlist("p", "🎵 P");
        store.fail_next(Operation::AddTracks, Some("other"), RemoteError::network("x"), 1);
        store.fail_next(Operation::AddTracks, Some("p"), RemoteError::server(503, "busy"), 1);
        assert!(store.add_tracks("p", &["t1".to_string()]).is_err());
        assert!(store.add_tracks("p", &["t1".to_string()]).is_ok());
        assert_eq!(store.calls_for(Operation::AddTracks, "p"), 2);
    }

    #[test]
    fn oversized_batches_are_rejected() {
        let store = MemoryStore::new("me").with_max_batch_size(1);
        store.add_playlist("p", "🎵 P");
        let ids = vec!["t1".to_string(), "t2".to_string()];
        assert!(store.add_tracks("p", &ids).is_err());
        assert!(store.track_ids("p").is_empty());
    }
}
