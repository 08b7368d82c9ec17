/// The common module holds the model types shared across the engine along with logging setup. Most
/// modules depend on it; it depends on nothing in the crate.

use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, EnvFilter};

pub type PlaylistId = String;

/// Outcome of an external classifier for a playlist. The engine never produces one itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    MatchedByArtist { artist: String },
    MatchedByGenre { genre: String },
    #[default]
    Unclassified,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::MatchedByArtist { artist } => write!(f, "artist:{artist}"),
            Classification::MatchedByGenre { genre } => write!(f, "genre:{genre}"),
            Classification::Unclassified => write!(f, "unclassified"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistDescriptor {
    pub id: PlaylistId,
    pub name: String,
    pub owner: String,
    /// Opaque token that changes whenever the remote playlist changes. May be empty when the
    /// listing does not carry one, in which case it is fetched on demand.
    pub revision_token: String,
    pub track_count: usize,
    #[serde(default)]
    pub classification: Classification,
}

impl PlaylistDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner: owner.into(),
            revision_token: String::new(),
            track_count: 0,
            classification: Classification::Unclassified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub track_id: String,
    /// None for items the store never dated; these sort as the oldest.
    pub added_at: Option<DateTime<Utc>>,
    pub added_by: Option<String>,
}

impl TrackRef {
    pub fn new(track_id: impl Into<String>, added_at: Option<DateTime<Utc>>) -> Self {
        Self { track_id: track_id.into(), added_at, added_by: None }
    }
}

/// Remove duplicates from a vector while preserving the order of first occurrence.
pub fn uniq<T: Clone + Eq + Hash>(xs: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(xs.len());
    for x in xs {
        if seen.insert(x.clone()) {
            result.push(x);
        }
    }
    result
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "playflow")
}

static LOGGING_INITIALIZED: Mutex<Option<HashSet<Option<String>>>> = Mutex::new(None);

/// Install the global tracing subscriber. `output` is either "stderr" or "file"; file logs go to
/// the platform state directory. Calling this twice with the same logger name is a no-op.
pub fn initialize_logging(logger_name: Option<&str>, output: &str) -> anyhow::Result<()> {
    {
        let mut guard = LOGGING_INITIALIZED
            .lock()
            .map_err(|_| anyhow::anyhow!("logging initialization lock poisoned"))?;
        let initialized = guard.get_or_insert_with(HashSet::new);
        if !initialized.insert(logger_name.map(|s| s.to_string())) {
            return Ok(());
        }
    }

    let proj_dirs = project_dirs().ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;
    let log_dir = if cfg!(target_os = "macos") {
        proj_dirs.cache_dir()
    } else {
        proj_dirs.state_dir().unwrap_or(proj_dirs.cache_dir())
    };

    let log_despite_testing = std::env::var("LOG_TEST").is_ok();
    let is_testing = std::env::var("CARGO_TEST").is_ok();
    if is_testing && !log_despite_testing {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match output {
        "stderr" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(!log_despite_testing)
                .with_thread_ids(log_despite_testing)
                .with_line_number(log_despite_testing)
                .with_file(log_despite_testing)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "file" => {
            fs::create_dir_all(log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .max_log_files(10)
                .filename_prefix(logger_name.unwrap_or("playflow"))
                .filename_suffix("log")
                .build(log_dir)?;
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        other => anyhow::bail!("unknown log output {other:?}, expected \"stderr\" or \"file\""),
    }

    Ok(())
}
