/// The migrate module moves tracks up the flow graph.
///
/// Parents are processed in propagation order. For each parent the tracks of all its children
/// (including tracks those children received earlier in the same run) are diffed against the
/// parent's own tracks, and the difference is written in batches. Because the diff is against what
/// the parent already holds, a second run with no new source tracks writes nothing.
///
/// When sources are not kept, a child is emptied of the tracks its parents now hold, but only after
/// its last parent has been processed and every addition into its parents succeeded.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::cache::{CacheEntry, MetadataCache};
use crate::common::{PlaylistDescriptor, PlaylistId, TrackRef};
use crate::deadline::Interruption;
use crate::error::{FlowError, Result};
use crate::graph::FlowGraph;
use crate::remote::{CollectionStore, RemoteCalls, RemoteError, RemoteErrorKind};
use crate::report::{NodeError, NodeStage, RunSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub parent: PlaylistId,
    /// Oldest first by (added_at, position in the source, source id).
    pub tracks_to_add: Vec<TrackRef>,
    /// The child each planned track is taken from.
    pub sources: BTreeMap<String, PlaylistId>,
    pub source_children: Vec<PlaylistId>,
}

/// Plan the additions into `parent`. A track reachable through several children is planned once,
/// from the occurrence that sorts first.
pub fn plan_additions<'a, I>(parent: &str, existing: &[TrackRef], children: I) -> MigrationPlan
where
    I: IntoIterator<Item = (&'a str, &'a [TrackRef])>,
{
    let existing: HashSet<&str> = existing.iter().map(|t| t.track_id.as_str()).collect();
    let mut best: BTreeMap<&str, (Option<DateTime<Utc>>, usize, &str, &TrackRef)> = BTreeMap::new();
    let mut source_children = Vec::new();

    for (child, tracks) in children {
        source_children.push(child.to_string());
        for (position, track) in tracks.iter().enumerate() {
            if existing.contains(track.track_id.as_str()) {
                continue;
            }
            let candidate = (track.added_at, position, child, track);
            let replace = match best.get(track.track_id.as_str()) {
                Some(current) => (candidate.0, candidate.1, candidate.2) < (current.0, current.1, current.2),
                None => true,
            };
            if replace {
                best.insert(track.track_id.as_str(), candidate);
            }
        }
    }

    let mut ordered: Vec<_> = best.into_values().collect();
    ordered.sort_by(|a, b| (a.0, a.1, a.2, &a.3.track_id).cmp(&(b.0, b.1, b.2, &b.3.track_id)));

    MigrationPlan {
        parent: parent.to_string(),
        sources: ordered.iter().map(|(_, _, child, t)| (t.track_id.clone(), child.to_string())).collect(),
        tracks_to_add: ordered.into_iter().map(|(_, _, _, t)| t.clone()).collect(),
        source_children,
    }
}

/// The tracks of `child` that every one of `parents` already holds.
pub fn plan_removals(child: &[TrackRef], parents: &[&[TrackRef]]) -> Vec<TrackRef> {
    if parents.is_empty() {
        return Vec::new();
    }
    let parent_sets: Vec<HashSet<&str>> =
        parents.iter().map(|p| p.iter().map(|t| t.track_id.as_str()).collect()).collect();
    child
        .iter()
        .filter(|t| parent_sets.iter().all(|s| s.contains(t.track_id.as_str())))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub batch_size: usize,
    pub keep_sources: bool,
    /// Recorded as `added_by` on tracks added this run.
    pub user: String,
    /// Recorded as `added_at` on tracks added this run.
    pub run_started: DateTime<Utc>,
}

pub struct Migrator<'a, S: CollectionStore + ?Sized> {
    calls: &'a RemoteCalls<'a, S>,
    settings: MigrationSettings,
    playlists: &'a BTreeMap<PlaylistId, PlaylistDescriptor>,
    // Working copy of every node's track list, updated as batches succeed.
    tracks: BTreeMap<PlaylistId, Vec<TrackRef>>,
    // Parents of each child not yet processed.
    pending_parents: BTreeMap<PlaylistId, usize>,
    // Children with at least one failed or skipped addition into a parent.
    incomplete_children: BTreeSet<PlaylistId>,
    interruption: Option<Interruption>,
}

impl<'a, S: CollectionStore + ?Sized> Migrator<'a, S> {
    pub fn new(
        calls: &'a RemoteCalls<'a, S>,
        settings: MigrationSettings,
        playlists: &'a BTreeMap<PlaylistId, PlaylistDescriptor>,
        tracks: BTreeMap<PlaylistId, Vec<TrackRef>>,
        graph: &FlowGraph,
    ) -> Self {
        let pending_parents = graph.nodes().map(|n| (n.clone(), graph.parents_of(n).count())).collect();
        Self { calls, settings, playlists, tracks, pending_parents, incomplete_children: BTreeSet::new(), interruption: None }
    }

    pub fn tracks_of(&self, id: &str) -> &[TrackRef] {
        self.tracks.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Set when a node's batches were cut short by the deadline or cancellation.
    pub fn take_interruption(&mut self) -> Option<Interruption> {
        self.interruption.take()
    }

    // Checked before every batch.
    fn should_stop(&mut self) -> bool {
        match self.calls.deadline().interruption() {
            Some(interruption) => {
                self.interruption.get_or_insert(interruption);
                true
            }
            None => false,
        }
    }

    fn batch_size(&self) -> usize {
        self.settings.batch_size.min(self.calls.store().max_batch_size()).max(1)
    }

    fn name_of(&self, id: &str) -> String {
        self.playlists.get(id).map(|p| p.name.clone()).unwrap_or_else(|| id.to_string())
    }

    /// Pull the tracks of every child of `node` into it, then empty children whose last parent this
    /// was. Returns Err only for run-fatal errors.
    pub fn process_node(&mut self, node: &str, graph: &FlowGraph, cache: &mut MetadataCache, summary: &mut RunSummary) -> Result<()> {
        let children: Vec<PlaylistId> = graph.children_of(node).cloned().collect();
        if children.is_empty() {
            return Ok(());
        }

        let complete = self.add_from_children(node, &children, cache, summary)?;
        for child in &children {
            if !complete {
                self.incomplete_children.insert(child.clone());
            }
            let last_parent = match self.pending_parents.get_mut(child) {
                Some(remaining) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                None => false,
            };
            if !last_parent || self.settings.keep_sources {
                continue;
            }
            if self.incomplete_children.contains(child) {
                debug!("keeping tracks in {:?}: not every parent received them", self.name_of(child));
                continue;
            }
            if self.should_stop() {
                return Ok(());
            }
            self.remove_from_child(child, graph, cache, summary)?;
        }
        Ok(())
    }

    // Returns whether every planned track was added.
    fn add_from_children(&mut self, node: &str, children: &[PlaylistId], cache: &mut MetadataCache, summary: &mut RunSummary) -> Result<bool> {
        let plan = plan_additions(node, self.tracks_of(node), children.iter().map(|c| (c.as_str(), self.tracks_of(c))));
        let name = self.name_of(node);
        if plan.tracks_to_add.is_empty() {
            debug!("{:?} already holds every track of its {} children", name, children.len());
            return Ok(true);
        }
        debug!("planned {} tracks for {:?} from {} children", plan.tracks_to_add.len(), name, plan.source_children.len());

        let batch_size = self.batch_size();
        let mut added = 0;
        let mut complete = true;
        for batch in plan.tracks_to_add.chunks(batch_size) {
            if self.should_stop() {
                complete = false;
                break;
            }
            let ids: Vec<String> = batch.iter().map(|t| t.track_id.clone()).collect();
            let result = self.calls.call(|s| s.add_tracks(node, &ids));
            let timed_out = result.is_timed_out();
            match result.into_result() {
                Ok(revision) => {
                    let settings = &self.settings;
                    self.tracks.entry(node.to_string()).or_default().extend(ids.iter().map(|id| TrackRef {
                        track_id: id.clone(),
                        added_at: Some(settings.run_started),
                        added_by: Some(settings.user.clone()),
                    }));
                    added += ids.len();
                    self.commit(node, revision, cache)?;
                }
                Err(e) => {
                    fatal_if_auth(&e)?;
                    summary.record_error(NodeError::from_remote(node, &name, NodeStage::Add, &e, timed_out));
                    complete = false;
                    break;
                }
            }
        }

        if added > 0 {
            let classification = self.playlists.get(node).map(|p| p.classification.to_string()).unwrap_or_default();
            info!(%classification, "added {} tracks to {:?}", added, name);
            *summary.additions.entry(node.to_string()).or_default() += added;
            summary.tracks_added += added;
        }
        Ok(complete)
    }

    fn remove_from_child(&mut self, child: &str, graph: &FlowGraph, cache: &mut MetadataCache, summary: &mut RunSummary) -> Result<()> {
        let to_remove = {
            let parents: Vec<&[TrackRef]> = graph.parents_of(child).map(|p| self.tracks_of(p)).collect();
            plan_removals(self.tracks_of(child), &parents)
        };
        if to_remove.is_empty() {
            return Ok(());
        }
        let name = self.name_of(child);

        let mut removed = 0;
        for batch in to_remove.chunks(self.batch_size()) {
            if self.should_stop() {
                break;
            }
            let ids: Vec<String> = batch.iter().map(|t| t.track_id.clone()).collect();
            let result = self.calls.call(|s| s.remove_tracks(child, &ids));
            let timed_out = result.is_timed_out();
            match result.into_result() {
                Ok(revision) => {
                    if let Some(tracks) = self.tracks.get_mut(child) {
                        tracks.retain(|t| !ids.contains(&t.track_id));
                    }
                    removed += ids.len();
                    self.commit(child, revision, cache)?;
                }
                Err(e) => {
                    fatal_if_auth(&e)?;
                    summary.record_error(NodeError::from_remote(child, &name, NodeStage::Remove, &e, timed_out));
                    break;
                }
            }
        }

        if removed > 0 {
            info!("removed {} migrated tracks from {:?}", removed, name);
            *summary.removals.entry(child.to_string()).or_default() += removed;
            summary.tracks_removed += removed;
        }
        Ok(())
    }

    // Record the post-write state of `id` in the cache.
    fn commit(&mut self, id: &str, revision: Option<String>, cache: &mut MetadataCache) -> Result<()> {
        let token = match revision {
            Some(token) => token,
            None => match self.calls.call(|s| s.revision_token(id)).into_result() {
                Ok(token) => token,
                Err(e) => {
                    fatal_if_auth(&e)?;
                    debug!("dropping cache entry for {}: revision unknown after write: {}", id, e);
                    cache.remove(id);
                    return Ok(());
                }
            },
        };
        cache.put(CacheEntry::new(id, token, Utc::now(), self.tracks_of(id).to_vec()));
        Ok(())
    }
}

fn fatal_if_auth(e: &RemoteError) -> Result<()> {
    if e.kind == RemoteErrorKind::Auth {
        return Err(FlowError::Auth(e.clone()));
    }
    Ok(())
}
