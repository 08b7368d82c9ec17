pub mod cache;
pub mod common;
pub mod config;
pub mod cycles;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod graph;
pub mod memory_store;
pub mod migrate;
pub mod ordering;
pub mod remote;
pub mod report;
pub mod retry;
pub mod signals;

pub use cache::{CacheEntry, MetadataCache};
pub use common::{initialize_logging, Classification, PlaylistDescriptor, PlaylistId, TrackRef};
pub use config::{Config, ConfigError};
pub use deadline::{CancelFlag, Interruption};
pub use engine::{FlowEngine, RunState};
pub use error::{FlowError, FlowExpectedError, Result};
pub use memory_store::MemoryStore;
pub use remote::{CollectionStore, Page, RemoteError, RemoteErrorKind, RemoteResult, RemoteTrack};
pub use report::{CollectingReporter, RunReporter, RunSummary, TracingReporter};
pub use retry::RetryConfig;
pub use signals::{extract_signals, SignalExtractor, SignalSet};

#[cfg(test)]
mod testing;

#[cfg(test)]
mod cache_test;
#[cfg(test)]
mod common_test;
#[cfg(test)]
mod config_test;
#[cfg(test)]
mod ordering_test;
