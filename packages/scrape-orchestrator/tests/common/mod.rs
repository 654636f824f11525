//! Shared helpers for integration tests.
//!
//! Workers are simulated with `sh -c` scripts that print the same
//! `[domain_spider]: {json}` lines the bundled spider does. The script
//! receives the comma-joined domains as `$1`, the job id as `$2`, the job
//! total as `$3` and the batch index as `$4`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use scrape_orchestrator::{
    MemoryRecordStore, OrchestratorConfig, RetryPolicy, WorkerCommand, WorkerPoolConfig,
};

/// Reports SUCCESS for every domain, then COMPLETE.
pub const ALL_SUCCESS: &str = r#"
IFS=,
for d in $1; do
  echo "[domain_spider]: {\"domain\": \"$d\", \"status\": \"SUCCESS\", \"website_title\": \"Title of $d\"}"
done
echo "[domain_spider]: {\"job\": \"$2\", \"status\": \"COMPLETE\", \"reason\": \"finished\"}"
"#;

/// Domains starting with `c-` fail: the first 40 succeed, the rest are
/// reported as ERROR on stderr, and the worker exits 1.
pub const C_BATCH_FAILS: &str = r#"
IFS=,
n=0
failing=0
for d in $1; do
  case "$d" in
    c-*)
      failing=1
      if [ "$n" -lt 40 ]; then
        echo "[domain_spider]: {\"domain\": \"$d\", \"status\": \"SUCCESS\"}"
      else
        echo "[domain_spider]: {\"domain\": \"$d\", \"status\": \"ERROR\", \"error\": \"timeout\"}" >&2
      fi
      n=$((n + 1))
      ;;
    *)
      echo "[domain_spider]: {\"domain\": \"$d\", \"status\": \"SUCCESS\"}"
      ;;
  esac
done
exit $failing
"#;

/// Install a test subscriber that respects RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A worker command running `script` under `sh`.
pub fn sh_worker(script: &str) -> WorkerCommand {
    WorkerCommand::new(
        "sh",
        [
            "-c",
            script,
            "worker",
            "{domains}",
            "{job_id}",
            "{total_domains}",
            "{batch_index}",
        ],
    )
}

/// Store seeded with `count` domains named `<prefix>-NNN.com`.
pub fn seeded_store(prefixes: &[(&str, usize)]) -> Arc<MemoryRecordStore> {
    let store = Arc::new(MemoryRecordStore::new());
    for (prefix, count) in prefixes {
        store.insert_domains((0..*count).map(|i| format!("{}-{:03}.com", prefix, i)));
    }
    store
}

/// Orchestrator config with quick retries and the given worker.
pub fn test_config(worker: WorkerCommand, batch_size: usize, concurrency: usize) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_page_size(100)
        .with_batch_size(batch_size)
        .with_pool(WorkerPoolConfig::with_concurrency(concurrency))
        .with_worker(worker)
        .with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_millis(1)),
        )
}
