//! Bounded pool of external worker processes.
//!
//! ```text
//! submit ─► bounded queue ─► dispatcher ─► acquire slot ─► spawn worker task
//!                                                             │
//!                           stdout reader ─┐                  │
//!                                          ├─► channel ─► event loop ─► sink
//!                           stderr reader ─┘                  │
//!                                                        wait for exit
//! ```
//!
//! At most `concurrency` workers hold a slot at any time. A slot is released
//! when the process exits, or as soon as the worker reports `COMPLETE` when
//! `release_slot_on_complete` is set.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::parser::{DomainOutcome, OutputParser, WorkerEvent};
use crate::types::JobId;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum number of workers running at once
    pub concurrency: usize,
    /// Batches that may wait for a slot before `submit` blocks
    pub queue_capacity: usize,
    /// Free the slot when the worker reports COMPLETE instead of at exit
    pub release_slot_on_complete: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::with_concurrency(4)
    }
}

impl WorkerPoolConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            queue_capacity: concurrency * 2,
            release_slot_on_complete: false,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_release_slot_on_complete(mut self, release: bool) -> Self {
        self.release_slot_on_complete = release;
        self
    }
}

/// How to launch one worker process.
///
/// Arguments may contain `{domains}` (comma-joined), `{job_id}`,
/// `{total_domains}` and `{batch_index}`; they are substituted per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::new(
            "scrapy",
            [
                "runspider",
                "scripts/scrape.py",
                "-a",
                "domains={domains}",
                "-a",
                "job_id={job_id}",
                "-a",
                "total_domains={total_domains}",
            ],
        )
    }
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Arguments with placeholders filled in for `batch`.
    pub fn render_args(&self, batch: &WorkBatch) -> Vec<String> {
        let domains = batch.domains.join(",");
        let job_id = batch.job_id.to_string();
        let total = batch.total_domains.to_string();
        let index = batch.index.to_string();

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{domains}", &domains)
                    .replace("{job_id}", &job_id)
                    .replace("{total_domains}", &total)
                    .replace("{batch_index}", &index)
            })
            .collect()
    }

    /// Build the process command for `batch` with piped output streams.
    pub fn build(&self, batch: &WorkBatch) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(batch))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

// ============================================================================
// BATCHES AND RESULTS
// ============================================================================

/// One unit of work handed to exactly one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkBatch {
    pub job_id: JobId,
    /// Position of the batch within its job, starting at 0
    pub index: usize,
    pub domains: Vec<String>,
    /// Size of the whole job, passed to the worker for its own progress reporting
    pub total_domains: u64,
}

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Exit code 0
    Succeeded,
    /// The process could not be started
    SpawnFailed(String),
    /// Nonzero exit, killed by a signal, or the exit status was lost
    ExitFailed { code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub index: usize,
    pub outcome: BatchOutcome,
    /// Whether the worker reported COMPLETE before exiting
    pub reported_complete: bool,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome == BatchOutcome::Succeeded
    }
}

/// Totals for everything a pool ran, returned by [`WorkerPool::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Highest number of slots held at once
    pub peak_concurrency: usize,
}

impl PoolReport {
    fn record(&mut self, joined: Result<BatchResult, JoinError>) {
        match joined {
            Ok(result) if result.is_success() => self.succeeded += 1,
            Ok(_) => self.failed += 1,
            Err(e) => {
                error!(error = %e, "worker task panicked");
                self.failed += 1;
            }
        }
    }
}

// ============================================================================
// EVENT SINK
// ============================================================================

/// Receives what workers report, in stream order per worker.
#[async_trait]
pub trait WorkerEventSink: Send + Sync {
    /// A domain finished crawling.
    async fn on_outcome(&self, batch: &WorkBatch, outcome: DomainOutcome);

    /// The worker process is gone and its output fully consumed.
    async fn on_batch_finished(&self, batch: &WorkBatch, result: &BatchResult);
}

// ============================================================================
// POOL
// ============================================================================

#[derive(Default)]
struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// A held pool slot. Dropping it frees the slot.
struct Slot {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<ConcurrencyGauge>,
}

impl Slot {
    fn acquire(permit: OwnedSemaphorePermit, gauge: Arc<ConcurrencyGauge>) -> Self {
        let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            _permit: permit,
            gauge,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

struct StreamLine {
    stream: StreamKind,
    text: String,
}

struct WorkerContext {
    command: WorkerCommand,
    parser: OutputParser,
    sink: Arc<dyn WorkerEventSink>,
    release_slot_on_complete: bool,
    gauge: Arc<ConcurrencyGauge>,
}

/// Runs batches as external processes, at most `concurrency` at a time.
pub struct WorkerPool {
    queue: mpsc::Sender<WorkBatch>,
    dispatcher: JoinHandle<PoolReport>,
}

impl WorkerPool {
    /// Start the dispatcher with its own `config.concurrency` slots.
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: WorkerPoolConfig,
        command: WorkerCommand,
        parser: OutputParser,
        sink: Arc<dyn WorkerEventSink>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self::start_with_slots(config, slots, command, parser, sink)
    }

    /// Start the dispatcher drawing from a slot semaphore shared with other
    /// pools, so several jobs together stay under one ceiling.
    pub fn start_with_slots(
        config: WorkerPoolConfig,
        slots: Arc<Semaphore>,
        command: WorkerCommand,
        parser: OutputParser,
        sink: Arc<dyn WorkerEventSink>,
    ) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let ctx = Arc::new(WorkerContext {
            command,
            parser,
            sink,
            release_slot_on_complete: config.release_slot_on_complete,
            gauge: Arc::new(ConcurrencyGauge::default()),
        });

        let dispatcher = tokio::spawn(dispatch_loop(rx, slots, ctx));
        Self { queue, dispatcher }
    }

    /// Queue a batch. Waits only while the queue is full.
    pub async fn submit(&self, batch: WorkBatch) -> Result<(), PoolError> {
        self.queue.send(batch).await.map_err(|_| PoolError::Closed)
    }

    /// Stop accepting batches and wait for every queued and running worker.
    ///
    /// Fails when the dispatcher died, since the batches it owned have an
    /// unknown fate.
    pub async fn drain(self) -> Result<PoolReport, PoolError> {
        drop(self.queue);
        self.dispatcher.await.map_err(|e| {
            error!(error = %e, "worker pool dispatcher panicked");
            PoolError::DispatcherFailed(e.to_string())
        })
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<WorkBatch>,
    semaphore: Arc<Semaphore>,
    ctx: Arc<WorkerContext>,
) -> PoolReport {
    let mut workers = JoinSet::new();
    let mut report = PoolReport::default();

    while let Some(batch) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        while let Some(joined) = workers.try_join_next() {
            report.record(joined);
        }

        let slot = Slot::acquire(permit, ctx.gauge.clone());
        report.dispatched += 1;
        let ctx = ctx.clone();
        workers.spawn(async move { ctx.run_batch(batch, slot).await });
    }

    while let Some(joined) = workers.join_next().await {
        report.record(joined);
    }
    report.peak_concurrency = ctx.gauge.peak.load(Ordering::SeqCst);
    report
}

impl WorkerContext {
    async fn run_batch(&self, batch: WorkBatch, slot: Slot) -> BatchResult {
        let mut slot = Some(slot);
        let job_id = batch.job_id;
        let index = batch.index;

        let mut child = match self.command.build(&batch).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(job_id = %job_id, batch = index, program = %self.command.program, error = %e, "failed to spawn worker");
                let result = BatchResult {
                    index,
                    outcome: BatchOutcome::SpawnFailed(e.to_string()),
                    reported_complete: false,
                };
                self.sink.on_batch_finished(&batch, &result).await;
                return result;
            }
        };
        info!(job_id = %job_id, batch = index, domains = batch.domains.len(), pid = ?child.id(), "worker started");

        let (tx, mut rx) = mpsc::channel(256);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_lines(stdout, StreamKind::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_lines(stderr, StreamKind::Stderr, tx.clone())));
        }
        drop(tx);

        let members: HashSet<&str> = batch.domains.iter().map(String::as_str).collect();
        let mut reported_complete = false;
        while let Some(line) = rx.recv().await {
            match self.parser.parse_line(&line.text) {
                Ok(Some(WorkerEvent::DomainOutcome(outcome))) => {
                    if !members.contains(outcome.domain.as_str()) {
                        warn!(job_id = %job_id, batch = index, domain = %outcome.domain, "worker reported a domain outside its batch, ignoring");
                        continue;
                    }
                    debug!(job_id = %job_id, batch = index, domain = %outcome.domain, status = outcome.status.as_str(), "domain outcome");
                    self.sink.on_outcome(&batch, outcome).await;
                }
                Ok(Some(WorkerEvent::BatchComplete { reason })) => {
                    info!(job_id = %job_id, batch = index, reason = reason.as_deref().unwrap_or("unknown"), "worker reported complete");
                    reported_complete = true;
                    if self.release_slot_on_complete {
                        drop(slot.take());
                    }
                }
                Ok(None) => {
                    debug!(job_id = %job_id, batch = index, stream = line.stream.as_str(), line = %line.text, "worker output");
                }
                Err(e) => {
                    warn!(job_id = %job_id, batch = index, stream = line.stream.as_str(), error = %e, "discarding unparsable worker line");
                }
            }
        }
        for reader in readers {
            let _ = reader.await;
        }

        let outcome = match child.wait().await {
            Ok(status) if status.success() => BatchOutcome::Succeeded,
            Ok(status) => {
                error!(job_id = %job_id, batch = index, exit_code = ?status.code(), "worker exited with failure");
                BatchOutcome::ExitFailed {
                    code: status.code(),
                }
            }
            Err(e) => {
                error!(job_id = %job_id, batch = index, error = %e, "failed to wait for worker");
                BatchOutcome::ExitFailed { code: None }
            }
        };

        let result = BatchResult {
            index,
            outcome,
            reported_complete,
        };
        self.sink.on_batch_finished(&batch, &result).await;
        drop(slot);

        if result.is_success() {
            info!(job_id = %job_id, batch = index, "worker finished");
        }
        result
    }
}

/// Forward every line of `stream` to `tx`, decoding invalid UTF-8 lossily.
async fn read_lines<R>(stream: R, kind: StreamKind, tx: mpsc::Sender<StreamLine>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stream).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if tx.send(StreamLine { stream: kind, text }).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(stream = kind.as_str(), error = %e, "worker stream read failed");
                break;
            }
        }
    }
}
