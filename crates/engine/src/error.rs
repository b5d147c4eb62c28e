use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures that end an orchestration run. Per-collection and
/// per-directory problems are recorded in the run summary instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot connect to document store {target}: {message}")]
    Connect { target: String, message: String },
    #[error("document store error: {0}")]
    Store(String),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{kind} {name:?} must be a plain relative name")]
    UnsafeName { kind: &'static str, name: String },
    #[error("invalid backup archive: {0}")]
    InvalidArchive(String),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    pub(crate) fn io(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
