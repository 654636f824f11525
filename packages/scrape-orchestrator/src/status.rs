//! Job status query.

use std::sync::Arc;

use crate::error::StatusError;
use crate::traits::RecordStore;
use crate::types::{JobId, JobStatusSnapshot};

/// Percentage of `total` that has finished, rounded and capped at 100.
pub fn progress_percent(finished: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let finished = finished.min(total) as u128;
    let percent = (finished * 200 + total as u128) / (total as u128 * 2);
    percent.min(100) as u8
}

/// Builds [`JobStatusSnapshot`]s from the job record and domain aggregates.
#[derive(Clone)]
pub struct JobStatusQuery {
    store: Arc<dyn RecordStore>,
}

impl JobStatusQuery {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatusSnapshot, StatusError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(StatusError::NotFound(job_id))?;

        let counts = self.store.count_domains_by_status(Some(job_id)).await?;

        Ok(JobStatusSnapshot {
            job_id,
            status: job.status,
            total_domains: job.total_domains,
            queued: job.queued,
            success_count: counts.success,
            error_count: counts.error,
            progress_percent: progress_percent(counts.finished(), job.total_domains),
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryRecordStore;
    use crate::types::{DomainPatch, DomainStatus, JobPatch};
    use chrono::Utc;

    #[test]
    fn test_progress_rounding() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(0, 250), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 200), 1);
        assert_eq!(progress_percent(250, 250), 100);
        assert_eq!(progress_percent(300, 250), 100);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let query = JobStatusQuery::new(Arc::new(MemoryRecordStore::new()));
        let id = JobId::new();
        assert!(matches!(query.status(id).await, Err(StatusError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_snapshot_counts_only_this_job() {
        let store = Arc::new(MemoryRecordStore::new());
        store.insert_domains(["a.com", "b.com", "c.com", "d.com"]);
        let job = JobId::new();
        store.merge_job(job, &JobPatch::created(4)).await.unwrap();

        for (domain, status, owner) in [
            ("a.com", DomainStatus::Success, job),
            ("b.com", DomainStatus::Error, job),
            ("c.com", DomainStatus::Success, JobId::new()),
        ] {
            let patch = DomainPatch {
                status,
                job_id: owner,
                crawled_at: Utc::now(),
                enrichment: serde_json::Map::new(),
            };
            store.merge_domain(domain, &patch).await.unwrap();
        }

        let snapshot = JobStatusQuery::new(store).status(job).await.unwrap();
        assert_eq!(snapshot.total_domains, 4);
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.progress_percent, 50);
    }
}
