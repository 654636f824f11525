//! Job state store adapter.
//!
//! Wraps a [`RecordStore`] with bounded retry for transient failures.
//! Outcome and progress merges are fire-and-forget: once retries run out
//! the update is logged and dropped. Job creation is the exception and
//! reports its error to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::parser::DomainOutcome;
use crate::traits::RecordStore;
use crate::types::{DomainPatch, JobId, JobPatch};

/// Exponential backoff for transient store errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after each failure
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Delay after `attempt` failed (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Idempotent writes of domain outcomes and job progress.
#[derive(Clone)]
pub struct JobStateStore {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl JobStateStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create the job record. Failures are returned, not swallowed.
    pub async fn create_job(&self, job_id: JobId, total_domains: u64) -> StoreResult<()> {
        let patch = JobPatch::created(total_domains);
        self.with_retries("job", &job_id.to_string(), || {
            self.store.merge_job(job_id, &patch)
        })
        .await
    }

    /// Merge a job patch, returning the final error when retries run out.
    pub async fn try_merge_job(&self, job_id: JobId, patch: &JobPatch) -> StoreResult<()> {
        self.with_retries("job", &job_id.to_string(), || {
            self.store.merge_job(job_id, patch)
        })
        .await
    }

    /// Merge a job patch; a persistent failure is logged and dropped.
    pub async fn merge_job(&self, job_id: JobId, patch: &JobPatch) {
        if let Err(e) = self.try_merge_job(job_id, patch).await {
            warn!(job_id = %job_id, ?patch, error = %e, "dropping job update");
        }
    }

    /// Record a domain outcome reported by a worker for `job_id`.
    pub async fn merge_domain(&self, job_id: JobId, outcome: &DomainOutcome) {
        let patch = DomainPatch {
            status: outcome.status,
            job_id,
            crawled_at: Utc::now(),
            enrichment: outcome.fields.clone(),
        };

        let result = self
            .with_retries("domain", &outcome.domain, || {
                self.store.merge_domain(&outcome.domain, &patch)
            })
            .await;

        if let Err(e) = result {
            warn!(
                job_id = %job_id,
                domain = %outcome.domain,
                status = outcome.status.as_str(),
                error = %e,
                "dropping domain outcome"
            );
        }
    }

    async fn with_retries<F, Fut>(&self, kind: &str, key: &str, mut op: F) -> StoreResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = StoreResult<()>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    debug!(kind, key, attempt, ?delay, error = %e, "retrying merge");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryRecordStore;
    use crate::testing::FlakyStore;
    use crate::types::{DomainStatus, JobStatus};

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_backoff(Duration::from_millis(1))
    }

    fn outcome(domain: &str, status: DomainStatus) -> DomainOutcome {
        DomainOutcome {
            domain: domain.to_string(),
            status,
            fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let inner = Arc::new(MemoryRecordStore::new());
        inner.insert_domains(["a.com"]);
        let flaky = Arc::new(FlakyStore::new(inner.clone()).with_merge_conflicts(2));
        let state = JobStateStore::with_retry(flaky.clone(), fast_retry(3));

        let job = JobId::new();
        state.merge_domain(job, &outcome("a.com", DomainStatus::Success)).await;

        let record = inner.get_domain("a.com").await.unwrap().unwrap();
        assert_eq!(record.status, DomainStatus::Success);
        assert_eq!(flaky.conflicts_injected(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_the_update() {
        let inner = Arc::new(MemoryRecordStore::new());
        inner.insert_domains(["a.com"]);
        let flaky = Arc::new(FlakyStore::new(inner.clone()).with_merge_conflicts(5));
        let state = JobStateStore::with_retry(flaky, fast_retry(3));

        state.merge_domain(JobId::new(), &outcome("a.com", DomainStatus::Error)).await;

        let record = inner.get_domain("a.com").await.unwrap().unwrap();
        assert_eq!(record.status, DomainStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_job_surfaces_failure() {
        let inner = Arc::new(MemoryRecordStore::new());
        let flaky = Arc::new(FlakyStore::new(inner.clone()).with_merge_conflicts(10));
        let state = JobStateStore::with_retry(flaky, fast_retry(2));

        let job = JobId::new();
        assert!(state.create_job(job, 5).await.is_err());
        assert!(inner.get_job(job).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replayed_outcome_is_idempotent() {
        let inner = Arc::new(MemoryRecordStore::new());
        inner.insert_domains(["a.com"]);
        let state = JobStateStore::new(inner.clone());
        let job = JobId::new();

        let mut reported = outcome("a.com", DomainStatus::Success);
        reported.fields.insert("website_title".into(), "A".into());
        state.merge_domain(job, &reported).await;
        let first = inner.get_domain("a.com").await.unwrap().unwrap();
        state.merge_domain(job, &reported).await;
        let second = inner.get_domain("a.com").await.unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.enrichment, second.enrichment);
        assert_eq!(first.last_job_id, second.last_job_id);

        state.create_job(job, 1).await.unwrap();
        state.merge_job(job, &JobPatch::status(JobStatus::Completed)).await;
        state.merge_job(job, &JobPatch::status(JobStatus::Running)).await;
        let record = inner.get_job(job).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }
}
