use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::{RemoteError, RemoteErrorKind};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Expected(#[from] FlowExpectedError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Authentication failed: {0}")]
    Auth(RemoteError),
    #[error("Remote error: {0}")]
    Remote(RemoteError),
    #[error("Failed to write cache file {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RemoteError> for FlowError {
    fn from(e: RemoteError) -> Self {
        match e.kind {
            RemoteErrorKind::Auth => FlowError::Auth(e),
            _ => FlowError::Remote(e),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowExpectedError {
    #[error("Cache schema mismatch in {path}: expected version {expected}, got {got}")]
    CacheSchemaMismatch { path: PathBuf, expected: u32, got: u32 },
    #[error("Corrupt cache file {path}: {message}")]
    CorruptCache { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, FlowError>;
