//! Typed errors for the scrape orchestrator.
//!
//! Uses `thiserror` for library errors (not `anyhow`); the server binary
//! wraps these with `anyhow::Context` at the edges.

use thiserror::Error;

use crate::types::JobId;

/// Errors returned by a [`RecordStore`](crate::traits::RecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent writer touched the same record; safe to retry
    #[error("concurrent write conflict on {key}")]
    Conflict { key: String },

    /// A scan token could not be decoded
    #[error("invalid scan cursor: {0}")]
    InvalidCursor(String),

    /// Any other backend failure
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                // 40001 serialization_failure, 40P01 deadlock_detected
                match db.code().as_deref() {
                    Some("40001") | Some("40P01") => StoreError::Conflict {
                        key: db.table().unwrap_or("unknown").to_string(),
                    },
                    _ => StoreError::Backend(Box::new(err)),
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Backend(Box::new(err)),
        }
    }
}

/// Errors raised while reading the corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// The corpus could not be read at all
    #[error("corpus source unavailable: {0}")]
    SourceUnavailable(#[source] StoreError),
}

/// Errors raised by the job status query.
#[derive(Debug, Error)]
pub enum StatusError {
    /// No job record exists for the id
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The store failed while building the snapshot
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced to callers of [`ScrapeOrchestrator`](crate::ScrapeOrchestrator).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The corpus could not be read when the job was started
    #[error("corpus source unavailable: {0}")]
    SourceUnavailable(#[source] StoreError),

    /// The corpus holds no domains
    #[error("corpus is empty, nothing to crawl")]
    EmptyCorpus,

    /// The job record could not be created
    #[error("failed to create job record: {0}")]
    JobCreation(#[source] StoreError),

    /// Status lookup failed
    #[error(transparent)]
    Status(#[from] StatusError),
}

impl From<CorpusError> for OrchestratorError {
    fn from(err: CorpusError) -> Self {
        match err {
            CorpusError::SourceUnavailable(e) => OrchestratorError::SourceUnavailable(e),
        }
    }
}

/// Errors from the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The dispatcher has stopped and no longer accepts batches
    #[error("worker pool is closed")]
    Closed,

    /// The dispatcher task panicked or was cancelled
    #[error("worker pool dispatcher failed: {0}")]
    DispatcherFailed(String),
}

/// A structured worker log line that could not be turned into an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutcomeParseError {
    /// The text after the prefix is not valid JSON
    #[error("invalid JSON after structured prefix: {0}")]
    InvalidJson(String),

    /// The JSON payload is not an object
    #[error("structured payload is not a JSON object")]
    NotAnObject,

    /// The `status` field holds an unrecognized value
    #[error("unknown worker status: {0}")]
    UnknownStatus(String),

    /// A per-domain status arrived without a `domain` field
    #[error("{status} outcome is missing the domain field")]
    MissingDomain { status: String },

    /// The reported domain does not normalize to a host
    #[error("invalid domain in outcome: {0}")]
    InvalidDomain(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
