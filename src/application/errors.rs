//! Application layer error types

use thiserror::Error;

use crate::domain::value_objects::GitSource;
use crate::infrastructure::extractors::ExtractionError;
use crate::infrastructure::projects::PersistenceError;
use crate::infrastructure::sources::SourceError;
use crate::infrastructure::store::StoreError;

/// Errors raised by the scan engine.
///
/// Only `AlreadyRunning` and `DataUnavailable` abort a run; the remaining
/// variants are collected per source or per project and reported in the run
/// summary while the scan continues.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a scan is already running")]
    AlreadyRunning,

    #[error("vulnerability data is not available; load a database before scanning")]
    DataUnavailable,

    #[error("source {source} failed: {error}")]
    Source {
        source: GitSource,
        #[source]
        error: SourceError,
    },

    #[error("project {project}: {error}")]
    ProjectSource {
        project: String,
        #[source]
        error: SourceError,
    },

    #[error("extraction failed for {project}: {error}")]
    Extraction {
        project: String,
        #[source]
        error: ExtractionError,
    },

    #[error("failed to persist {project}: {error}")]
    Persistence {
        project: String,
        #[source]
        error: PersistenceError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(String),
}
