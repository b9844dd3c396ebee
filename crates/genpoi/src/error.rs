//! Fatal errors for a genpoi run.
//!
//! Per-item problems (corrupt chunks, unreadable player files, failed name
//! lookups, failing filters) never reach this type; they are logged and
//! skipped where they happen.

use std::io;
use std::path::PathBuf;

use crate::world::ChunkError;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(
        "render '{render}' uses world '{world}', but there is no corresponding entry in [worlds]"
    )]
    UnknownWorld { render: String, world: String },

    #[error("render '{render}' requested dimension '{dimension}', but {path} has no such region set")]
    MissingDimension {
        render: String,
        dimension: String,
        path: PathBuf,
    },

    #[error("render '{render}' uses unrecognized dimension tag '{tag}'")]
    UnknownDimension { render: String, tag: String },

    #[error("marker set '{marker}' in render '{render}' refers to undefined filter '{filter}'")]
    UnknownFilter {
        render: String,
        marker: String,
        filter: String,
    },

    #[error("POI has neither x/y/z fields nor a 3-element Pos list (id: {id})")]
    MissingPosition { id: String },

    #[error("marker sets '{first}' and '{second}' both map to internal name '{internal}'")]
    MarkerSetCollision {
        internal: String,
        first: String,
        second: String,
    },

    #[error("failed to enumerate chunks in {path}: {source}")]
    ChunkScan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("extraction failed for region set {regionset}: {source}")]
    Extraction {
        regionset: String,
        #[source]
        source: ChunkError,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
