/// The engine module runs one flow pass: load playlists, build the graph, neutralize cycles, order
/// the nodes, migrate, and report. The run is a state machine; one playlist failing is recorded and
/// the run moves on, while authentication failures and cache write failures end it in `Failed`.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use crate::cache::{CacheEntry, MetadataCache};
use crate::common::{PlaylistDescriptor, PlaylistId, TrackRef};
use crate::config::Config;
use crate::cycles::{find_cycles, remove_cycles};
use crate::deadline::{CancelFlag, Deadline, Interruption};
use crate::error::{FlowError, Result};
use crate::graph::{build_flow_graph, InclusionFilters};
use crate::migrate::{MigrationSettings, Migrator};
use crate::ordering::propagation_order;
use crate::remote::{CollectionStore, RemoteCalls, RemoteError, RemoteErrorKind, RemoteResult};
use crate::report::{NodeError, NodeStage, RunReporter, RunSummary, Warning, WarningKind};
use crate::signals::{SignalExtractor, SignalSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Loading,
    GraphBuilding,
    CycleDetection,
    Ordering,
    /// Processing node `index` of `total` in propagation order.
    Migrating { index: usize, total: usize },
    Reporting,
    Done,
    Failed,
}

// Playlists that take part in the run, keyed by id.
#[derive(Default)]
struct LoadedPlaylists {
    descriptors: BTreeMap<PlaylistId, PlaylistDescriptor>,
    signals: BTreeMap<PlaylistId, SignalSet>,
    tracks: BTreeMap<PlaylistId, Vec<TrackRef>>,
}

pub struct FlowEngine<'a, S: CollectionStore + ?Sized> {
    store: &'a S,
    config: &'a Config,
    extractor: SignalExtractor,
    cancel: CancelFlag,
    state: RunState,
    transitions: Vec<RunState>,
}

impl<'a, S: CollectionStore + ?Sized> FlowEngine<'a, S> {
    pub fn new(store: &'a S, config: &'a Config) -> Self {
        Self {
            store,
            config,
            extractor: SignalExtractor::new(config.ignored_name_prefixes.clone()),
            cancel: CancelFlag::new(),
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state the last run passed through, starting with `Idle`.
    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    fn transition(&mut self, next: RunState) {
        debug!("run state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    pub fn run(&mut self, reporter: &mut dyn RunReporter) -> Result<RunSummary> {
        let started = Instant::now();
        let run_started = Utc::now();
        let summary = RunSummary::new(Uuid::now_v7());
        let span = info_span!("flow_run", run_id = %summary.run_id);
        let _enter = span.enter();
        self.state = RunState::Idle;
        self.transitions = vec![RunState::Idle];

        if !self.config.enabled {
            info!("playlist flow is disabled, skipping run");
            return Ok(self.finish(summary, started, reporter));
        }

        let mut summary = summary;
        let deadline = Deadline::new(self.config.run_timeout, self.cancel.clone());
        self.transition(RunState::Loading);
        let cache_path = self.config.cache_path();
        let mut cache = match MetadataCache::load(&cache_path) {
            Ok(cache) => cache,
            Err(e) => {
                summary.record_warning(Warning::new(WarningKind::CacheIntegrity, format!("could not read cache, rebuilding it: {e}")));
                MetadataCache::empty(&cache_path)
            }
        };
        if let Some(issue) = cache.integrity_issue() {
            summary.record_warning(Warning::new(WarningKind::CacheIntegrity, format!("rebuilding cache: {issue}")));
        }

        let outcome = self.execute(&mut cache, &deadline, run_started, &mut summary);
        // The cache is flushed whether or not the run succeeded.
        let flushed = cache.flush_with_retry();
        if let Err(e) = outcome {
            self.transition(RunState::Failed);
            error!("flow run failed: {}", e);
            if let Err(flush_error) = flushed {
                error!("cache flush failed as well: {}", flush_error);
            }
            return Err(e);
        }
        if let Err(e) = flushed {
            self.transition(RunState::Failed);
            error!("flow run failed: {}", e);
            return Err(e);
        }

        Ok(self.finish(summary, started, reporter))
    }

    fn finish(&mut self, mut summary: RunSummary, started: Instant, reporter: &mut dyn RunReporter) -> RunSummary {
        summary.duration = started.elapsed();
        self.transition(RunState::Reporting);
        reporter.report(&summary);
        self.transition(RunState::Done);
        summary
    }

    fn execute(&mut self, cache: &mut MetadataCache, deadline: &Deadline, run_started: DateTime<Utc>, summary: &mut RunSummary) -> Result<()> {
        let calls = RemoteCalls::new(self.store, self.config.retry, self.config.batch_timeout, deadline);

        let listed = calls.call(|s| s.current_user()).into_result().and_then(|user| Ok((user, calls.fetch_all_playlists()?)));
        let (user, listing) = match listed {
            Ok(listed) => listed,
            Err(e) if e.kind == RemoteErrorKind::Auth => return Err(e.into()),
            Err(e) => {
                error!("could not list playlists: {}", e);
                let interruption = deadline.interruption().unwrap_or(Interruption::ListingFailed { message: e.to_string() });
                summary.interruption = Some(interruption);
                return Ok(());
            }
        };
        summary.playlists_scanned = listing.len();
        let live: HashSet<&str> = listing.iter().map(|p| p.id.as_str()).collect();
        cache.evict_missing(&live);

        let loaded = self.load_playlists(&calls, listing, &user, cache, summary)?;
        if let Some(interruption) = deadline.interruption() {
            info!("stopping before migration: {}", interruption);
            summary.interruption = Some(interruption);
            return Ok(());
        }

        self.transition(RunState::GraphBuilding);
        let filters = InclusionFilters::new(self.config.source_filters.clone(), self.config.target_filters.clone());
        let mut graph = build_flow_graph(
            loaded.descriptors.values().filter_map(|d| loaded.signals.get(&d.id).map(|s| (d, s))),
            &filters,
        );
        summary.edges_total = graph.edge_count();
        info!("built flow graph with {} playlists and {} edges", graph.node_count(), graph.edge_count());

        self.transition(RunState::CycleDetection);
        if self.config.skip_cycles {
            let report = remove_cycles(&mut graph);
            summary.edges_skipped_cycle = report.skipped_edge_count();
            for cycle in &report.cycles {
                let names: Vec<&str> = cycle.members.iter().map(|id| loaded.descriptors.get(id).map_or(id.as_str(), |d| d.name.as_str())).collect();
                info!("skipped cycle between {}", names.join(", "));
            }
            summary.cycles = report.cycles;
        } else {
            let cycles = find_cycles(&graph);
            if !cycles.is_empty() {
                summary.record_warning(Warning::new(
                    WarningKind::CyclesKept,
                    format!("{} cycles kept because cycle skipping is disabled", cycles.len()),
                ));
            }
            summary.cycles = cycles;
        }

        self.transition(RunState::Ordering);
        let order = propagation_order(&graph);

        let settings = MigrationSettings {
            batch_size: self.config.batch_size,
            keep_sources: self.config.keep_sources,
            user,
            run_started,
        };
        let mut migrator = Migrator::new(&calls, settings, &loaded.descriptors, loaded.tracks, &graph);
        let total = order.len();
        for (index, node) in order.iter().enumerate() {
            if let Some(interruption) = deadline.interruption() {
                info!("stopping with {} of {} playlists processed: {}", index, total, interruption);
                summary.interruption = Some(interruption);
                break;
            }
            self.transition(RunState::Migrating { index, total });
            migrator.process_node(node, &graph, cache, summary)?;
        }
        if summary.interruption.is_none() {
            summary.interruption = migrator.take_interruption();
        }
        Ok(())
    }

    // Resolve the track lists of every signalled playlist the user owns.
    fn load_playlists(
        &self,
        calls: &RemoteCalls<'_, S>,
        listing: Vec<PlaylistDescriptor>,
        user: &str,
        cache: &mut MetadataCache,
        summary: &mut RunSummary,
    ) -> Result<LoadedPlaylists> {
        let mut loaded = LoadedPlaylists::default();
        for mut playlist in listing {
            let signals = self.extractor.extract(&playlist.name);
            if signals.is_empty() {
                continue;
            }
            if playlist.owner != user {
                summary.record_warning(Warning::for_playlist(
                    WarningKind::Permission,
                    &playlist.id,
                    &playlist.name,
                    format!("excluding {:?}: owned by {}", playlist.name, playlist.owner),
                ));
                continue;
            }
            if calls.deadline().interruption().is_some() {
                break;
            }

            if playlist.revision_token.is_empty() {
                match calls.call(|s| s.revision_token(&playlist.id)).into_result() {
                    Ok(token) => playlist.revision_token = token,
                    Err(e) => {
                        exclude_on_load_error(&playlist, e, summary)?;
                        continue;
                    }
                }
            }
            match self.resolve_tracks(calls, &playlist, cache) {
                Ok(tracks) => {
                    loaded.tracks.insert(playlist.id.clone(), tracks);
                    loaded.signals.insert(playlist.id.clone(), signals);
                    loaded.descriptors.insert(playlist.id.clone(), playlist);
                }
                Err(e) => exclude_on_load_error(&playlist, e, summary)?,
            }
        }
        debug!("loaded {} flow playlists", loaded.descriptors.len());
        Ok(loaded)
    }

    fn resolve_tracks(&self, calls: &RemoteCalls<'_, S>, playlist: &PlaylistDescriptor, cache: &mut MetadataCache) -> RemoteResult<Vec<TrackRef>> {
        let now = Utc::now();
        if self.config.use_cache {
            if let Some(entry) = cache.get_fresh(&playlist.id, &playlist.revision_token, self.config.cache_ttl, now) {
                debug!("using cached tracks for {:?}", playlist.name);
                return Ok(entry.tracks.clone());
            }
        }
        debug!("fetching tracks for {:?}", playlist.name);
        let tracks = calls.fetch_all_tracks(&playlist.id)?;
        cache.put(CacheEntry::new(&playlist.id, &playlist.revision_token, now, tracks.clone()));
        Ok(tracks)
    }
}

fn exclude_on_load_error(playlist: &PlaylistDescriptor, e: RemoteError, summary: &mut RunSummary) -> Result<()> {
    match e.kind {
        RemoteErrorKind::Auth => Err(FlowError::Auth(e)),
        RemoteErrorKind::Permission => {
            summary.record_warning(Warning::for_playlist(
                WarningKind::Permission,
                &playlist.id,
                &playlist.name,
                format!("excluding {:?}: {}", playlist.name, e),
            ));
            Ok(())
        }
        _ => {
            summary.record_error(NodeError::from_remote(&playlist.id, &playlist.name, NodeStage::Load, &e, false));
            Ok(())
        }
    }
}
