use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Opaque job identifier.
///
/// V7 UUIDs are time-ordered, so job ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// ENUMS (type-safe states)
// ============================================================================

/// Lifecycle of a scrape job.
///
/// Variants are declared in lifecycle order; a merge never moves a job
/// to an earlier state, and `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Combine the stored status with an incoming one.
    pub fn advance(self, next: JobStatus) -> JobStatus {
        self.max(next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Outcome of the most recent crawl attempt for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DomainStatus {
    Pending,
    Success,
    Error,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "PENDING",
            DomainStatus::Success => "SUCCESS",
            DomainStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DomainStatus::Pending),
            "SUCCESS" => Some(DomainStatus::Success),
            "ERROR" => Some(DomainStatus::Error),
            _ => None,
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// Durable job metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub total_domains: u64,
    pub queued: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh record built from a patch, for stores that see the id for the first time.
    pub fn from_patch(id: JobId, patch: &JobPatch, now: DateTime<Utc>) -> Self {
        let total_domains = patch.total_domains.unwrap_or(0);
        Self {
            id,
            status: patch.status.unwrap_or(JobStatus::Pending),
            total_domains,
            queued: patch.queued.unwrap_or(0).min(total_domains),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update using the job merge rules.
    pub fn apply(&mut self, patch: &JobPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = self.status.advance(status);
        }
        if self.total_domains == 0 {
            if let Some(total) = patch.total_domains {
                self.total_domains = total;
            }
        }
        if let Some(queued) = patch.queued {
            self.queued = self.queued.max(queued).min(self.total_domains);
        }
        self.updated_at = now;
    }
}

/// Partial job update.
///
/// `status` only advances, `total_domains` is fixed once known and
/// `queued` only grows, so replaying a patch is harmless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub total_domains: Option<u64>,
    pub queued: Option<u64>,
}

impl JobPatch {
    pub fn created(total_domains: u64) -> Self {
        Self {
            status: Some(JobStatus::Pending),
            total_domains: Some(total_domains),
            queued: Some(0),
        }
    }

    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn queued(queued: u64) -> Self {
        Self {
            queued: Some(queued),
            ..Default::default()
        }
    }
}

/// A domain in the corpus store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub status: DomainStatus,
    pub last_job_id: Option<JobId>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub enrichment: serde_json::Map<String, serde_json::Value>,
}

impl DomainRecord {
    /// A corpus entry that has never been crawled.
    pub fn pending(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            status: DomainStatus::Pending,
            last_job_id: None,
            last_crawled_at: None,
            enrichment: serde_json::Map::new(),
        }
    }

    /// Apply the outcome of a crawl attempt (last write wins, enrichment merged by key).
    pub fn apply(&mut self, patch: &DomainPatch) {
        self.status = patch.status;
        self.last_job_id = Some(patch.job_id);
        self.last_crawled_at = Some(patch.crawled_at);
        for (key, value) in &patch.enrichment {
            self.enrichment.insert(key.clone(), value.clone());
        }
    }
}

/// Result of one crawl attempt, merged into a [`DomainRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct DomainPatch {
    pub status: DomainStatus,
    pub job_id: JobId,
    pub crawled_at: DateTime<Utc>,
    pub enrichment: serde_json::Map<String, serde_json::Value>,
}

/// Grouped domain counts by crawl status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub success: u64,
    pub error: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: DomainStatus, count: u64) {
        match status {
            DomainStatus::Pending => self.pending += count,
            DomainStatus::Success => self.success += count,
            DomainStatus::Error => self.error += count,
        }
    }

    /// Domains with a finished crawl attempt.
    pub fn finished(&self) -> u64 {
        self.success + self.error
    }
}

// ============================================================================
// SCANNING
// ============================================================================

/// An opened corpus scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStart {
    /// Number of domains covered by the snapshot
    pub total: u64,
    /// Opaque token for the first page
    pub token: String,
}

/// One page of a corpus scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    pub domains: Vec<String>,
    /// Token for the following page, `None` once the snapshot is exhausted
    pub next_token: Option<String>,
}

// ============================================================================
// JOB API
// ============================================================================

/// Returned by `start_job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStarted {
    pub job_id: JobId,
    pub total_domains: u64,
}

/// Point-in-time view of a job, rebuilt from store aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_domains: u64,
    pub queued: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Final result of a job's background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub batches_dispatched: usize,
    pub batches_failed: usize,
    /// Most workers this job had running at once
    pub peak_concurrency: usize,
    /// False when the corpus scan broke off before the snapshot was exhausted
    pub scan_completed: bool,
}
