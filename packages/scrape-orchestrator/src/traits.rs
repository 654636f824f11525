use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::*;

// ============================================================================
// RECORD STORE: durable domain and job state
// ============================================================================

/// The external record store holding the domain corpus and job metadata.
///
/// Every write is an upsert-with-merge keyed by id, so callers never need a
/// prior read and replays are harmless. Implementations report concurrent
/// write conflicts as [`StoreError::Conflict`](crate::StoreError::Conflict);
/// retrying is the caller's business.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Corpus scan (snapshot + keyset)

    /// Snapshot the corpus and return its size with a token for the first page.
    async fn open_scan(&self, page_size: u32) -> StoreResult<ScanStart>;

    /// Fetch the page identified by `token`.
    async fn next_page(&self, token: &str) -> StoreResult<ScanPage>;

    // Get by id

    async fn get_job(&self, id: JobId) -> StoreResult<Option<JobRecord>>;

    async fn get_domain(&self, domain: &str) -> StoreResult<Option<DomainRecord>>;

    // Upsert with merge

    async fn merge_job(&self, id: JobId, patch: &JobPatch) -> StoreResult<()>;

    async fn merge_domain(&self, domain: &str, patch: &DomainPatch) -> StoreResult<()>;

    // Aggregation

    /// Count domains grouped by status, optionally only those last touched by `job`.
    async fn count_domains_by_status(&self, job: Option<JobId>) -> StoreResult<StatusCounts>;
}
