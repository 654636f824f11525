//! Scrape Job Orchestrator
//!
//! Walks a large corpus of domains, hands them in fixed-size batches to a
//! bounded pool of external crawler processes, and folds the crawlers'
//! structured log output back into per-domain and per-job state.
//!
//! # Pipeline
//!
//! ```text
//! RecordStore ─► CorpusPaginator ─► Batcher ─► WorkerPool ─► worker process
//!      ▲                                                          │
//!      └──── JobStateStore ◄── WorkerEventSink ◄── OutputParser ◄─┘
//! ```
//!
//! Job state lives in the store, never in memory. Every write is an
//! idempotent merge, so a job's status can be rebuilt at any time with
//! [`ScrapeOrchestrator::get_status`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scrape_orchestrator::{MemoryRecordStore, OrchestratorConfig, ScrapeOrchestrator};
//!
//! let store = Arc::new(MemoryRecordStore::new());
//! store.insert_domains(["example.com", "example.org"]);
//!
//! let orchestrator = ScrapeOrchestrator::new(store, OrchestratorConfig::default());
//! let job = orchestrator.start_job().await?;
//! let snapshot = orchestrator.get_status(job.job_id).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - The `RecordStore` abstraction
//! - [`stores`] - Memory and PostgreSQL stores
//! - [`paginator`] / [`batcher`] - Corpus scan and batching
//! - [`pool`] - Worker processes and slot management
//! - [`parser`] - Worker output parsing
//! - [`state`] / [`status`] - Merges with retry, status snapshots
//! - [`server`] - HTTP adapter
//! - [`testing`] - Fault-injecting store for tests

pub mod batcher;
pub mod config;
pub mod cursor;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod paginator;
pub mod parser;
pub mod pool;
pub mod server;
pub mod state;
pub mod status;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use batcher::{batch_domains, Batcher};
pub use config::{Config, OrchestratorConfig};
pub use domain::normalize_domain;
pub use error::{
    CorpusError, OrchestratorError, OutcomeParseError, PoolError, StatusError, StoreError,
};
pub use orchestrator::{JobEventSink, ScrapeOrchestrator, StartedJob};
pub use paginator::CorpusPaginator;
pub use parser::{DomainOutcome, OutputParser, WorkerEvent};
pub use pool::{
    BatchOutcome, BatchResult, PoolReport, WorkBatch, WorkerCommand, WorkerEventSink, WorkerPool,
    WorkerPoolConfig,
};
pub use state::{JobStateStore, RetryPolicy};
pub use status::{progress_percent, JobStatusQuery};
pub use stores::{MemoryRecordStore, PostgresRecordStore};
pub use traits::RecordStore;
pub use types::*;
