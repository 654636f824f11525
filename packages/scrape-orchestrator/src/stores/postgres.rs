//! PostgreSQL record store.
//!
//! Every write is a single `INSERT .. ON CONFLICT DO UPDATE`, so merges are
//! atomic without explicit transactions. Lifecycle rules for job status
//! live in SQL (`scrape_job_status_rank`) so concurrent writers cannot
//! regress a job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Row};
use tracing::debug;
use uuid::Uuid;

use crate::cursor::ScanCursor;
use crate::domain::normalize_domain;
use crate::error::StoreResult;
use crate::traits::RecordStore;
use crate::types::*;

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    total_domains: i64,
    queued: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        JobRecord {
            id: JobId::from_uuid(row.id),
            status: JobStatus::parse(&row.status).unwrap_or(JobStatus::Pending),
            total_domains: row.total_domains.max(0) as u64,
            queued: row.queued.max(0) as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct DomainRow {
    domain: String,
    status: String,
    last_job_id: Option<Uuid>,
    last_crawled_at: Option<DateTime<Utc>>,
    enrichment: serde_json::Value,
}

impl From<DomainRow> for DomainRecord {
    fn from(row: DomainRow) -> Self {
        let enrichment = match row.enrichment {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        DomainRecord {
            domain: row.domain,
            status: DomainStatus::parse(&row.status).unwrap_or(DomainStatus::Pending),
            last_job_id: row.last_job_id.map(JobId::from_uuid),
            last_crawled_at: row.last_crawled_at,
            enrichment,
        }
    }
}

/// PostgreSQL-backed corpus and job registry.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Create a store from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a small pool.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Seed the corpus with domains, normalizing them first.
    ///
    /// Returns the number of new rows; existing domains are left untouched.
    pub async fn insert_domains<I, S>(&self, domains: I) -> StoreResult<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: Vec<String> = domains
            .into_iter()
            .filter_map(|d| normalize_domain(d.as_ref()))
            .collect();

        if normalized.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO scrape_domains (domain)
            SELECT * FROM UNNEST($1::TEXT[])
            ON CONFLICT (domain) DO NOTHING
            "#,
        )
        .bind(&normalized)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    // ========================================================================
    // CORPUS SCAN
    // ========================================================================

    async fn open_scan(&self, page_size: u32) -> StoreResult<ScanStart> {
        let mut tx = self.pool.begin().await?;

        // Sequence values are handed out before commit. SHARE mode waits for
        // in-flight inserts to finish, so every seq <= high_water is settled
        // and the count matches what the scan will yield.
        sqlx::query("LOCK TABLE scrape_domains IN SHARE MODE")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(seq), 0)::BIGINT AS high_water,
                   COUNT(*)::BIGINT AS total
            FROM scrape_domains
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let high_water: i64 = row.try_get("high_water")?;
        let total: i64 = row.try_get("total")?;
        debug!(high_water, total, "opened corpus scan");

        Ok(ScanStart {
            total: total.max(0) as u64,
            token: ScanCursor::start(high_water, page_size).encode(),
        })
    }

    async fn next_page(&self, token: &str) -> StoreResult<ScanPage> {
        let cursor = ScanCursor::decode(token)?;

        let domains: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT domain
            FROM scrape_domains
            WHERE seq <= $1
              AND ($2::TEXT IS NULL OR domain > $2)
            ORDER BY domain
            LIMIT $3
            "#,
        )
        .bind(cursor.high_water)
        .bind(cursor.after.as_deref())
        .bind(cursor.page_size as i64)
        .fetch_all(&self.pool)
        .await?;

        let next_token = cursor.next_token(&domains);
        Ok(ScanPage {
            domains,
            next_token,
        })
    }

    // ========================================================================
    // GET BY ID
    // ========================================================================

    async fn get_job(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, status, total_domains, queued, created_at, updated_at
            FROM scrape_jobs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(JobRecord::from))
    }

    async fn get_domain(&self, domain: &str) -> StoreResult<Option<DomainRecord>> {
        let row = sqlx::query_as::<_, DomainRow>(
            r#"
            SELECT domain, status, last_job_id, last_crawled_at, enrichment
            FROM scrape_domains
            WHERE domain = $1
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DomainRecord::from))
    }

    // ========================================================================
    // MERGES
    // ========================================================================

    async fn merge_job(&self, id: JobId, patch: &JobPatch) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scrape_jobs (id, status, total_domains, queued)
            VALUES (
                $1,
                COALESCE($2::TEXT, 'pending'),
                COALESCE($3::BIGINT, 0),
                LEAST(COALESCE($4::BIGINT, 0), COALESCE($3::BIGINT, 0))
            )
            ON CONFLICT (id) DO UPDATE SET
                status = CASE
                    WHEN scrape_job_status_rank(EXCLUDED.status) > scrape_job_status_rank(scrape_jobs.status)
                    THEN EXCLUDED.status
                    ELSE scrape_jobs.status
                END,
                total_domains = CASE
                    WHEN scrape_jobs.total_domains = 0 THEN EXCLUDED.total_domains
                    ELSE scrape_jobs.total_domains
                END,
                queued = LEAST(
                    GREATEST(scrape_jobs.queued, COALESCE($4::BIGINT, 0)),
                    CASE
                        WHEN scrape_jobs.total_domains = 0 THEN EXCLUDED.total_domains
                        ELSE scrape_jobs.total_domains
                    END
                ),
                updated_at = NOW()
            "#,
        )
        .bind(id.as_uuid())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.total_domains.map(|t| t as i64))
        .bind(patch.queued.map(|q| q as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn merge_domain(&self, domain: &str, patch: &DomainPatch) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scrape_domains (domain, status, last_job_id, last_crawled_at, enrichment)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (domain) DO UPDATE SET
                status = EXCLUDED.status,
                last_job_id = EXCLUDED.last_job_id,
                last_crawled_at = EXCLUDED.last_crawled_at,
                enrichment = scrape_domains.enrichment || EXCLUDED.enrichment
            "#,
        )
        .bind(domain)
        .bind(patch.status.as_str())
        .bind(patch.job_id.as_uuid())
        .bind(patch.crawled_at)
        .bind(serde_json::Value::Object(patch.enrichment.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // AGGREGATION
    // ========================================================================

    async fn count_domains_by_status(&self, job: Option<JobId>) -> StoreResult<StatusCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*)::BIGINT AS count
            FROM scrape_domains
            WHERE ($1::UUID IS NULL OR last_job_id = $1)
            GROUP BY status
            "#,
        )
        .bind(job.map(|j| j.as_uuid()))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            if let Some(status) = DomainStatus::parse(&status) {
                counts.add(status, count.max(0) as u64);
            }
        }
        Ok(counts)
    }
}
