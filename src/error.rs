use std::path::PathBuf;

use thiserror::Error;

use crate::model::RunStatus;

/// Failure to turn a query URL into a loaded document. Recorded per URL,
/// never fatal to a run.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("spider.cloud: {0}")]
    Spider(String),

    #[error("cannot read snapshot {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} returned an empty document")]
    Empty(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot create {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run #{0} is already finished and cannot be changed")]
    Frozen(i64),
}

/// Per-container failure inside the listing extractor.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("container #{0} has no title")]
    Untitled(usize),
}

#[derive(Debug, Error)]
#[error("run outcome cannot move from {from} to {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}
