//! Testing utilities including a fault-injecting store.
//!
//! Useful for exercising retry and failure paths of the orchestrator
//! without a real database.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::traits::RecordStore;
use crate::types::*;

/// Wraps another [`RecordStore`] and injects failures on demand.
///
/// - merge conflicts: the next `n` merges fail with [`StoreError::Conflict`]
/// - scan outage: `open_scan` fails with [`StoreError::Unavailable`]
/// - mid-scan outage: `next_page` fails after a number of successful pages
pub struct FlakyStore {
    inner: Arc<dyn RecordStore>,

    /// Remaining merges to fail with a conflict
    merge_conflicts: AtomicU32,

    /// Conflicts handed out so far
    conflicts_injected: AtomicU32,

    /// Fail every `open_scan`
    scan_unavailable: AtomicBool,

    /// Pages served before `next_page` starts failing; `u32::MAX` disables
    pages_before_outage: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            merge_conflicts: AtomicU32::new(0),
            conflicts_injected: AtomicU32::new(0),
            scan_unavailable: AtomicBool::new(false),
            pages_before_outage: AtomicU32::new(u32::MAX),
        }
    }

    /// Fail the next `count` merges (job or domain) with a conflict.
    pub fn with_merge_conflicts(self, count: u32) -> Self {
        self.merge_conflicts.store(count, Ordering::SeqCst);
        self
    }

    /// Make the corpus unreachable when a scan is opened.
    pub fn with_scan_unavailable(self) -> Self {
        self.scan_unavailable.store(true, Ordering::SeqCst);
        self
    }

    /// Serve `pages` pages, then fail every following `next_page`.
    pub fn with_scan_outage_after(self, pages: u32) -> Self {
        self.pages_before_outage.store(pages, Ordering::SeqCst);
        self
    }

    /// Number of conflicts returned so far.
    pub fn conflicts_injected(&self) -> u32 {
        self.conflicts_injected.load(Ordering::SeqCst)
    }

    fn take_conflict(&self, key: &str) -> StoreResult<()> {
        let took = self
            .merge_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            self.conflicts_injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn open_scan(&self, page_size: u32) -> StoreResult<ScanStart> {
        if self.scan_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected scan outage".to_string()));
        }
        self.inner.open_scan(page_size).await
    }

    async fn next_page(&self, token: &str) -> StoreResult<ScanPage> {
        let served = self
            .pages_before_outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                u32::MAX => Some(n),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok();
        if !served {
            return Err(StoreError::Unavailable("injected mid-scan outage".to_string()));
        }
        self.inner.next_page(token).await
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        self.inner.get_job(id).await
    }

    async fn get_domain(&self, domain: &str) -> StoreResult<Option<DomainRecord>> {
        self.inner.get_domain(domain).await
    }

    async fn merge_job(&self, id: JobId, patch: &JobPatch) -> StoreResult<()> {
        self.take_conflict(&id.to_string())?;
        self.inner.merge_job(id, patch).await
    }

    async fn merge_domain(&self, domain: &str, patch: &DomainPatch) -> StoreResult<()> {
        self.take_conflict(domain)?;
        self.inner.merge_domain(domain, patch).await
    }

    async fn count_domains_by_status(&self, job: Option<JobId>) -> StoreResult<StatusCounts> {
        self.inner.count_domains_by_status(job).await
    }
}
