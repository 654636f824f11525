//! In-memory record store for testing and development.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use crate::cursor::ScanCursor;
use crate::domain::normalize_domain;
use crate::error::StoreResult;
use crate::traits::RecordStore;
use crate::types::*;

struct StoredDomain {
    seq: i64,
    record: DomainRecord,
}

#[derive(Default)]
struct Corpus {
    domains: BTreeMap<String, StoredDomain>,
    last_seq: i64,
}

impl Corpus {
    fn insert(&mut self, record: DomainRecord) -> bool {
        if self.domains.contains_key(&record.domain) {
            return false;
        }
        self.last_seq += 1;
        let seq = self.last_seq;
        self.domains
            .insert(record.domain.clone(), StoredDomain { seq, record });
        true
    }
}

/// In-memory corpus and job registry.
///
/// Same scan and merge semantics as the Postgres store. Data is lost on
/// restart, so this is not suitable for production.
pub struct MemoryRecordStore {
    corpus: RwLock<Corpus>,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            corpus: RwLock::new(Corpus::default()),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the corpus with domains, normalizing them first.
    ///
    /// Returns the number of new domains; invalid and already-present
    /// domains are skipped.
    pub fn insert_domains<I, S>(&self, domains: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut corpus = self.corpus.write().unwrap();
        domains
            .into_iter()
            .filter_map(|d| normalize_domain(d.as_ref()))
            .filter(|d| corpus.insert(DomainRecord::pending(d.clone())))
            .count()
    }

    /// Number of domains in the corpus.
    pub fn domain_count(&self) -> usize {
        self.corpus.read().unwrap().domains.len()
    }

    /// Number of job records.
    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn open_scan(&self, page_size: u32) -> StoreResult<ScanStart> {
        let corpus = self.corpus.read().unwrap();
        let cursor = ScanCursor::start(corpus.last_seq, page_size);
        Ok(ScanStart {
            total: corpus.domains.len() as u64,
            token: cursor.encode(),
        })
    }

    async fn next_page(&self, token: &str) -> StoreResult<ScanPage> {
        let cursor = ScanCursor::decode(token)?;
        let corpus = self.corpus.read().unwrap();

        let lower = match &cursor.after {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };
        let domains: Vec<String> = corpus
            .domains
            .range((lower, Bound::Unbounded))
            .filter(|(_, stored)| stored.seq <= cursor.high_water)
            .take(cursor.page_size as usize)
            .map(|(domain, _)| domain.clone())
            .collect();

        let next_token = cursor.next_token(&domains);
        Ok(ScanPage {
            domains,
            next_token,
        })
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn get_domain(&self, domain: &str) -> StoreResult<Option<DomainRecord>> {
        Ok(self
            .corpus
            .read()
            .unwrap()
            .domains
            .get(domain)
            .map(|stored| stored.record.clone()))
    }

    async fn merge_job(&self, id: JobId, patch: &JobPatch) -> StoreResult<()> {
        let now = Utc::now();
        self.jobs
            .write()
            .unwrap()
            .entry(id)
            .and_modify(|record| record.apply(patch, now))
            .or_insert_with(|| JobRecord::from_patch(id, patch, now));
        Ok(())
    }

    async fn merge_domain(&self, domain: &str, patch: &DomainPatch) -> StoreResult<()> {
        let mut corpus = self.corpus.write().unwrap();
        if let Some(stored) = corpus.domains.get_mut(domain) {
            stored.record.apply(patch);
            return Ok(());
        }

        let mut record = DomainRecord::pending(domain);
        record.apply(patch);
        corpus.insert(record);
        Ok(())
    }

    async fn count_domains_by_status(&self, job: Option<JobId>) -> StoreResult<StatusCounts> {
        let corpus = self.corpus.read().unwrap();
        let mut counts = StatusCounts::default();
        for stored in corpus.domains.values() {
            if job.is_none() || stored.record.last_job_id == job {
                counts.add(stored.record.status, 1);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(job_id: JobId) -> DomainPatch {
        DomainPatch {
            status: DomainStatus::Success,
            job_id,
            crawled_at: Utc::now(),
            enrichment: serde_json::Map::new(),
        }
    }

    async fn scan_all(store: &MemoryRecordStore, page_size: u32) -> Vec<String> {
        let start = store.open_scan(page_size).await.unwrap();
        let mut token = Some(start.token);
        let mut seen = Vec::new();
        while let Some(t) = token {
            let page = store.next_page(&t).await.unwrap();
            seen.extend(page.domains);
            token = page.next_token;
        }
        seen
    }

    #[tokio::test]
    async fn test_insert_domains_normalizes_and_dedupes() {
        let store = MemoryRecordStore::new();
        let added = store.insert_domains(["https://www.a.com", "a.com", "b.com/path", ""]);
        assert_eq!(added, 2);
        assert!(store.get_domain("a.com").await.unwrap().is_some());
        assert!(store.get_domain("b.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scan_yields_every_domain_once() {
        let store = MemoryRecordStore::new();
        store.insert_domains((0..25).map(|i| format!("d{:02}.com", i)));

        let seen = scan_all(&store, 10).await;
        assert_eq!(seen.len(), 25);
        let mut sorted = seen.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), 25);
    }

    #[tokio::test]
    async fn test_scan_ignores_domains_added_after_open() {
        let store = MemoryRecordStore::new();
        store.insert_domains(["b.com", "d.com"]);

        let start = store.open_scan(1).await.unwrap();
        assert_eq!(start.total, 2);

        // a.com sorts before the cursor, c.com after it; neither is in the snapshot
        store.insert_domains(["a.com", "c.com"]);
        store.merge_domain("b.com", &success(JobId::new())).await.unwrap();

        let mut token = Some(start.token);
        let mut seen = Vec::new();
        while let Some(t) = token {
            let page = store.next_page(&t).await.unwrap();
            seen.extend(page.domains);
            token = page.next_token;
        }
        assert_eq!(seen, vec!["b.com".to_string(), "d.com".to_string()]);
    }

    #[tokio::test]
    async fn test_counts_filter_by_job() {
        let store = MemoryRecordStore::new();
        store.insert_domains(["a.com", "b.com", "c.com"]);
        let job = JobId::new();
        let other = JobId::new();

        store.merge_domain("a.com", &success(job)).await.unwrap();
        let mut failed = success(job);
        failed.status = DomainStatus::Error;
        store.merge_domain("b.com", &failed).await.unwrap();
        store.merge_domain("c.com", &success(other)).await.unwrap();

        let counts = store.count_domains_by_status(Some(job)).await.unwrap();
        assert_eq!((counts.success, counts.error, counts.pending), (1, 1, 0));

        let all = store.count_domains_by_status(None).await.unwrap();
        assert_eq!(all.finished(), 3);
    }

    #[tokio::test]
    async fn test_merge_job_respects_lifecycle() {
        let store = MemoryRecordStore::new();
        let id = JobId::new();
        store.merge_job(id, &JobPatch::created(10)).await.unwrap();
        store.merge_job(id, &JobPatch::status(JobStatus::Failed)).await.unwrap();
        store.merge_job(id, &JobPatch::status(JobStatus::Completed)).await.unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.total_domains, 10);
    }
}
