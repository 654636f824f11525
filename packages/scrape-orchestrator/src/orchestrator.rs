//! Scrape job orchestration.
//!
//! # Architecture
//!
//! ```text
//! start_job
//!     │
//!     ├─► open corpus scan (fails fast: SourceUnavailable / EmptyCorpus)
//!     ├─► create job record (pending)
//!     └─► spawn job run ──► next page ─► Batcher ─► WorkerPool.submit
//!                              ▲                         │
//!                              └──────── repeat ─────────┘
//!                           drain pool ─► completed / failed
//! ```
//!
//! Workers report through [`JobEventSink`], which merges domain outcomes
//! and marks the job failed when a batch fails. Job status is never held in
//! memory; [`ScrapeOrchestrator::get_status`] rebuilds it from the store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::batcher::Batcher;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result, StatusError};
use crate::paginator::CorpusPaginator;
use crate::parser::{DomainOutcome, OutputParser};
use crate::pool::{BatchOutcome, BatchResult, PoolReport, WorkBatch, WorkerEventSink, WorkerPool};
use crate::state::JobStateStore;
use crate::status::JobStatusQuery;
use crate::traits::RecordStore;
use crate::types::*;

/// A job whose record exists and whose dispatch runs in the background.
#[derive(Debug)]
pub struct StartedJob {
    pub job_id: JobId,
    pub total_domains: u64,
    /// Resolves once every batch has finished
    pub handle: JoinHandle<JobSummary>,
}

impl StartedJob {
    pub fn started(&self) -> JobStarted {
        JobStarted {
            job_id: self.job_id,
            total_domains: self.total_domains,
        }
    }

    /// Wait for the background run to finish.
    pub async fn wait(self) -> std::result::Result<JobSummary, JoinError> {
        self.handle.await
    }
}

/// Entry point: starts scrape jobs and answers status queries.
#[derive(Clone)]
pub struct ScrapeOrchestrator {
    paginator: CorpusPaginator,
    state: JobStateStore,
    status: JobStatusQuery,
    /// Worker slots shared by every job this orchestrator runs
    slots: Arc<Semaphore>,
    config: Arc<OrchestratorConfig>,
}

impl ScrapeOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, config: OrchestratorConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.pool.concurrency.max(1)));
        Self {
            paginator: CorpusPaginator::new(store.clone()),
            state: JobStateStore::with_retry(store.clone(), config.retry.clone()),
            status: JobStatusQuery::new(store),
            slots,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a job over the whole corpus.
    ///
    /// Returns once the job record exists. Nothing is persisted when the
    /// corpus cannot be read or is empty.
    pub async fn start_job(&self) -> Result<StartedJob> {
        let scan = self.paginator.open(self.config.page_size).await?;
        if scan.total == 0 {
            return Err(OrchestratorError::EmptyCorpus);
        }

        let job_id = JobId::new();
        self.state
            .create_job(job_id, scan.total)
            .await
            .map_err(OrchestratorError::JobCreation)?;

        info!(job_id = %job_id, total_domains = scan.total, "scrape job created");

        let run = JobRun {
            job_id,
            total_domains: scan.total,
            paginator: self.paginator.clone(),
            state: self.state.clone(),
            slots: self.slots.clone(),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(run.run(scan.token));

        Ok(StartedJob {
            job_id,
            total_domains: scan.total,
            handle,
        })
    }

    /// Current snapshot of a job.
    pub async fn get_status(&self, job_id: JobId) -> std::result::Result<JobStatusSnapshot, StatusError> {
        self.status.status(job_id).await
    }
}

// ============================================================================
// JOB RUN
// ============================================================================

struct JobRun {
    job_id: JobId,
    total_domains: u64,
    paginator: CorpusPaginator,
    state: JobStateStore,
    slots: Arc<Semaphore>,
    config: Arc<OrchestratorConfig>,
}

#[derive(Default)]
struct DispatchProgress {
    batches: usize,
    queued: u64,
}

impl JobRun {
    async fn run(self, first_token: String) -> JobSummary {
        let job_id = self.job_id;
        let sink = Arc::new(JobEventSink {
            state: self.state.clone(),
        });
        let pool = WorkerPool::start_with_slots(
            self.config.pool.clone(),
            self.slots.clone(),
            self.config.worker.clone(),
            OutputParser::new(self.config.log_prefix.clone()),
            sink,
        );

        let mut batcher = Batcher::new(self.config.batch_size);
        let mut progress = DispatchProgress::default();
        let mut scan_completed = true;
        let mut dispatch_ok = true;
        let mut token = Some(first_token);

        'scan: while let Some(current) = token.take() {
            let page = match self.paginator.next(&current).await {
                Ok(page) => page,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "corpus scan failed mid-job, stopping dispatch");
                    scan_completed = false;
                    break;
                }
            };

            for domains in batcher.push(page.domains) {
                if !self.dispatch(&pool, &mut progress, domains).await {
                    dispatch_ok = false;
                    break 'scan;
                }
            }
            token = page.next_token;
        }

        if scan_completed && dispatch_ok {
            if let Some(rest) = batcher.finish() {
                dispatch_ok = self.dispatch(&pool, &mut progress, rest).await;
            }
        }

        if !scan_completed || !dispatch_ok {
            self.state
                .merge_job(job_id, &JobPatch::status(JobStatus::Failed))
                .await;
        }

        let (report, pool_ok) = match pool.drain().await {
            Ok(report) => (report, true),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "worker pool stopped abnormally");
                (PoolReport::default(), false)
            }
        };

        let status = if scan_completed && dispatch_ok && pool_ok && report.failed == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.state.merge_job(job_id, &JobPatch::status(status)).await;

        info!(
            job_id = %job_id,
            status = status.as_str(),
            batches = report.dispatched,
            failed_batches = report.failed,
            queued = progress.queued,
            peak_concurrency = report.peak_concurrency,
            "scrape job finished"
        );

        JobSummary {
            job_id,
            status,
            batches_dispatched: report.dispatched,
            batches_failed: report.failed,
            peak_concurrency: report.peak_concurrency,
            scan_completed,
        }
    }

    /// Hand one batch to the pool and record progress. Returns false when
    /// the pool no longer accepts work.
    async fn dispatch(
        &self,
        pool: &WorkerPool,
        progress: &mut DispatchProgress,
        domains: Vec<String>,
    ) -> bool {
        let size = domains.len() as u64;
        let batch = WorkBatch {
            job_id: self.job_id,
            index: progress.batches,
            domains,
            total_domains: self.total_domains,
        };

        if let Err(e) = pool.submit(batch).await {
            error!(job_id = %self.job_id, batch = progress.batches, error = %e, "failed to queue batch");
            return false;
        }

        let first = progress.batches == 0;
        progress.batches += 1;
        progress.queued += size;

        let patch = JobPatch {
            status: first.then_some(JobStatus::Running),
            total_domains: None,
            queued: Some(progress.queued),
        };
        self.state.merge_job(self.job_id, &patch).await;
        true
    }
}

// ============================================================================
// EVENT SINK
// ============================================================================

/// Writes worker reports for one job into the store.
pub struct JobEventSink {
    state: JobStateStore,
}

impl JobEventSink {
    pub fn new(state: JobStateStore) -> Self {
        Self { state }
    }
}

#[async_trait]
impl WorkerEventSink for JobEventSink {
    async fn on_outcome(&self, batch: &WorkBatch, outcome: DomainOutcome) {
        self.state.merge_domain(batch.job_id, &outcome).await;
    }

    async fn on_batch_finished(&self, batch: &WorkBatch, result: &BatchResult) {
        match &result.outcome {
            BatchOutcome::Succeeded => return,
            BatchOutcome::SpawnFailed(reason) => {
                warn!(job_id = %batch.job_id, batch = batch.index, %reason, "batch never started, marking job failed");
            }
            BatchOutcome::ExitFailed { code } => {
                warn!(job_id = %batch.job_id, batch = batch.index, exit_code = ?code, "batch failed, marking job failed");
            }
        }
        self.state
            .merge_job(batch.job_id, &JobPatch::status(JobStatus::Failed))
            .await;
    }
}
