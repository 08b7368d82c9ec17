/// The report module defines the run summary and the sink it is handed to. Rendering and delivery
/// (chat, desktop notifications) belong to the embedder; [`TracingReporter`] logs it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::PlaylistId;
use crate::cycles::CycleDiagnostic;
use crate::deadline::Interruption;
use crate::remote::{RemoteError, RemoteErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStage {
    Load,
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    /// A transient error outlasted every retry.
    RetriesExhausted,
    Timeout,
    Permission,
    NotFound,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeError {
    pub playlist_id: PlaylistId,
    pub name: String,
    pub stage: NodeStage,
    pub kind: NodeErrorKind,
    pub message: String,
}

impl NodeError {
    pub fn from_remote(playlist_id: &str, name: &str, stage: NodeStage, error: &RemoteError, timed_out: bool) -> Self {
        let kind = if timed_out {
            NodeErrorKind::Timeout
        } else {
            match error.kind {
                RemoteErrorKind::RateLimited | RemoteErrorKind::Server | RemoteErrorKind::Network => NodeErrorKind::RetriesExhausted,
                RemoteErrorKind::Permission => NodeErrorKind::Permission,
                RemoteErrorKind::NotFound => NodeErrorKind::NotFound,
                RemoteErrorKind::Auth | RemoteErrorKind::Permanent => NodeErrorKind::Permanent,
            }
        };
        Self { playlist_id: playlist_id.to_string(), name: name.to_string(), stage, kind, message: error.to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// The playlist belongs to someone else or could not be read; it was left out of the run.
    Permission,
    /// The cache file was unreadable or from another schema version and was rebuilt.
    CacheIntegrity,
    /// Cycle edges were kept because cycle skipping is disabled.
    CyclesKept,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub playlist_id: Option<PlaylistId>,
    pub name: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self { kind, playlist_id: None, name: None, message: message.into() }
    }

    pub fn for_playlist(kind: WarningKind, playlist_id: &str, name: &str, message: impl Into<String>) -> Self {
        Self { kind, playlist_id: Some(playlist_id.to_string()), name: Some(name.to_string()), message: message.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub playlists_scanned: usize,
    pub edges_total: usize,
    pub edges_skipped_cycle: usize,
    pub tracks_added: usize,
    pub tracks_removed: usize,
    pub nodes_with_errors: usize,
    pub duration: Duration,
    pub cycles: Vec<CycleDiagnostic>,
    /// Tracks added per parent. Only parents that received tracks appear.
    pub additions: BTreeMap<PlaylistId, usize>,
    /// Tracks removed per child.
    pub removals: BTreeMap<PlaylistId, usize>,
    pub errors: Vec<NodeError>,
    pub warnings: Vec<Warning>,
    pub interruption: Option<Interruption>,
}

impl RunSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self { run_id, ..Self::default() }
    }

    pub fn timed_out(&self) -> bool {
        self.interruption == Some(Interruption::RunTimeout)
    }

    pub fn record_error(&mut self, error: NodeError) {
        warn!("{:?} failed for playlist {:?} ({:?}): {}", error.stage, error.name, error.kind, error.message);
        self.errors.push(error);
        self.nodes_with_errors = self.errors.iter().map(|e| e.playlist_id.as_str()).collect::<BTreeSet<_>>().len();
    }

    pub fn record_warning(&mut self, warning: Warning) {
        warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    /// One line per cycle saying whether its edges were skipped or kept.
    pub fn cycle_lines(&self) -> Vec<String> {
        // Every cycle holds at least one edge, so skipping always leaves a nonzero count.
        let verb = if self.edges_skipped_cycle > 0 { "skipped" } else { "kept" };
        self.cycles.iter().map(|c| format!("{verb} cycle: {}", c.members.join(" <-> "))).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {} playlists, {} edges ({} skipped in {} cycles), added {} tracks, removed {} tracks, {} playlists with errors in {:.1}s",
            self.playlists_scanned,
            self.edges_total,
            self.edges_skipped_cycle,
            self.cycles.len(),
            self.tracks_added,
            self.tracks_removed,
            self.nodes_with_errors,
            self.duration.as_secs_f64(),
        )?;
        if let Some(interruption) = &self.interruption {
            write!(f, " (stopped early: {interruption})")?;
        }
        Ok(())
    }
}

/// Receives the summary at the end of every run, including runs that stopped early.
pub trait RunReporter {
    fn report(&mut self, summary: &RunSummary);
}

#[derive(Debug, Default)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn report(&mut self, summary: &RunSummary) {
        info!(run_id = %summary.run_id, "flow run finished: {}", summary);
        for (parent, count) in &summary.additions {
            info!("added {} tracks to {}", count, parent);
        }
        for line in summary.cycle_lines() {
            info!("{}", line);
        }
        for error in &summary.errors {
            warn!("{}: {:?} {:?}: {}", error.name, error.stage, error.kind, error.message);
        }
    }
}

/// Keeps every summary it receives.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub summaries: Vec<RunSummary>,
}

impl RunReporter for CollectingReporter {
    fn report(&mut self, summary: &RunSummary) {
        self.summaries.push(summary.clone());
    }
}
