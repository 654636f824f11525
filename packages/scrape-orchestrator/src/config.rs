use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::parser::DEFAULT_STRUCTURED_PREFIX;
use crate::pool::{WorkerCommand, WorkerPoolConfig};
use crate::state::RetryPolicy;

/// Tuning for a [`ScrapeOrchestrator`](crate::ScrapeOrchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Domains fetched per corpus page
    pub page_size: u32,
    /// Domains handed to one worker process
    pub batch_size: usize,
    pub pool: WorkerPoolConfig,
    pub worker: WorkerCommand,
    /// Prefix marking structured lines in worker output
    pub log_prefix: String,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            batch_size: 100,
            pool: WorkerPoolConfig::default(),
            worker: WorkerCommand::default(),
            log_prefix: DEFAULT_STRUCTURED_PREFIX.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Service configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let concurrency: usize = parse_var("WORKER_CONCURRENCY", 4)?;
        let mut pool = WorkerPoolConfig::with_concurrency(concurrency);
        if let Ok(capacity) = env::var("WORKER_QUEUE_CAPACITY") {
            pool = pool.with_queue_capacity(
                capacity
                    .parse()
                    .context("WORKER_QUEUE_CAPACITY must be a valid number")?,
            );
        }
        let release_early = parse_var("WORKER_RELEASE_ON_COMPLETE", false)?;
        pool = pool.with_release_slot_on_complete(release_early);

        let mut worker = WorkerCommand::default();
        if let Ok(program) = env::var("WORKER_PROGRAM") {
            worker.program = program;
        }
        if let Ok(args) = env::var("WORKER_ARGS") {
            worker.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Ok(dir) = env::var("WORKER_DIR") {
            worker = worker.with_working_dir(PathBuf::from(dir));
        }

        let retry = RetryPolicy::default()
            .with_max_attempts(parse_var("MERGE_MAX_ATTEMPTS", 3)?)
            .with_initial_backoff(Duration::from_millis(parse_var("MERGE_BACKOFF_MS", 50)?));

        let orchestrator = OrchestratorConfig::default()
            .with_page_size(parse_var("PAGE_SIZE", 100)?)
            .with_batch_size(parse_var("BATCH_SIZE", 100)?)
            .with_pool(pool)
            .with_worker(worker)
            .with_log_prefix(
                env::var("WORKER_LOG_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_STRUCTURED_PREFIX.to_string()),
            )
            .with_retry(retry);

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_var("PORT", 8080)?,
            orchestrator,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid value, got {:?}", name, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_bundled_spider() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.pool.concurrency, 4);
        assert_eq!(config.pool.queue_capacity, 8);
        assert_eq!(config.worker.program, "scrapy");
        assert_eq!(config.log_prefix, "[domain_spider]:");
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_builders_clamp_zero() {
        let config = OrchestratorConfig::default()
            .with_page_size(0)
            .with_batch_size(0);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.batch_size, 1);
    }
}
