//! Claims due jobs from the queue, dispatches them to the [`Processor`], and
//! applies retry-with-backoff. Generalizes the teacher's background-loop
//! pattern (interval timers racing a shutdown receiver) into a job-claiming
//! dispatcher: `start()` reclaims orphaned `running` jobs exactly once,
//! `run_once` claims a batch and dispatches by [`JobType`].

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use knowdisk_core::capability::Clock;
use knowdisk_core::config::WorkerConfig;
use knowdisk_core::error::Result;
use knowdisk_core::model::{JobRow, JobType};
use knowdisk_db::ProjectDb;
use knowdisk_index::ParserRegistry;
use tracing::{error, instrument, warn};

use crate::processor::Processor;

/// Outcome counters for one [`WorkerPool::run_once`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOnceStats {
  pub claimed: usize,
  pub settled: usize,
  pub retried: usize,
}

/// Lifecycle hooks fired as jobs are dispatched. Mirrors the teacher's
/// callback-shaped observability surface rather than a channel, since the
/// worker pool has exactly one interested party (the orchestrator) per run.
pub trait WorkerEvents: Send + Sync {
  fn on_job_start(&self, _job: &JobRow) {}
  fn on_job_done(&self, _job: &JobRow) {}
  fn on_job_error(&self, _job: &JobRow, _error: &str, _terminal: bool) {}
}

/// A [`WorkerEvents`] implementation that does nothing, for callers with no
/// need to observe individual job transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWorkerEvents;
impl WorkerEvents for NoopWorkerEvents {}

/// Hook invoked for `reconcile` jobs; the orchestrator supplies this so the
/// worker pool never needs to know about source-path walking.
#[async_trait::async_trait]
pub trait ReconcileHook: Send + Sync {
  async fn reconcile(&self, path: &str) -> Result<()>;
}

pub struct WorkerPool {
  db: Arc<ProjectDb>,
  processor: Arc<Processor>,
  parsers: Arc<ParserRegistry>,
  clock: Arc<dyn Clock>,
  config: WorkerConfig,
  events: Arc<dyn WorkerEvents>,
  reconcile_hook: Option<Arc<dyn ReconcileHook>>,
}

impl WorkerPool {
  pub fn new(db: Arc<ProjectDb>, processor: Arc<Processor>, parsers: Arc<ParserRegistry>, clock: Arc<dyn Clock>, config: WorkerConfig) -> Self {
    Self {
      db,
      processor,
      parsers,
      clock,
      config,
      events: Arc::new(NoopWorkerEvents),
      reconcile_hook: None,
    }
  }

  pub fn with_events(mut self, events: Arc<dyn WorkerEvents>) -> Self {
    self.events = events;
    self
  }

  pub fn with_reconcile_hook(mut self, hook: Arc<dyn ReconcileHook>) -> Self {
    self.reconcile_hook = Some(hook);
    self
  }

  /// Reclaim orphaned `running` jobs from a prior crash. Call exactly once,
  /// before the first [`WorkerPool::run_once`].
  #[instrument(level = "info", skip(self))]
  pub async fn start(&self) -> Result<usize> {
    let now = self.clock.now_ms();
    let reset = self.db.reset_running_jobs_to_pending(now).await?;
    if reset > 0 {
      warn!(reset, "reclaimed orphaned running jobs from a prior crash");
    }
    Ok(reset)
  }

  /// Claim up to `config.batch_size` due jobs and dispatch up to
  /// `config.concurrency` of them in parallel.
  #[instrument(level = "debug", skip(self))]
  pub async fn run_once(&self, now_ms: i64) -> Result<RunOnceStats> {
    let claimed = self.db.claim_due_jobs(now_ms, self.config.batch_size).await?;
    let claimed_count = claimed.len();

    let results: Vec<bool> = stream::iter(claimed.into_iter().map(|job| self.dispatch_one(job, now_ms)))
      .buffer_unordered(self.config.concurrency.max(1))
      .collect()
      .await;

    let retried = results.iter().filter(|was_retried| **was_retried).count();
    Ok(RunOnceStats {
      claimed: claimed_count,
      settled: claimed_count,
      retried,
    })
  }

  /// Dispatch one claimed job and settle it. Returns `true` if the job was
  /// retried (requeued with backoff) rather than completed or terminally
  /// failed.
  async fn dispatch_one(&self, job: JobRow, now_ms: i64) -> bool {
    self.events.on_job_start(&job);
    let outcome = self.execute(&job).await;

    match outcome {
      Ok(()) => {
        if let Err(err) = self.db.complete_job(&job.job_id, now_ms).await {
          error!(job_id = %job.job_id, error = %err, "failed to mark job complete");
        }
        self.events.on_job_done(&job);
        false
      }
      Err(err) => self.settle_failure(job, err, now_ms).await,
    }
  }

  async fn execute(&self, job: &JobRow) -> Result<()> {
    match job.job_type {
      JobType::Delete => self.processor.delete_file(&job.path).await,
      JobType::Index => {
        let path = std::path::Path::new(&job.path);
        match self.parsers.resolve(path) {
          knowdisk_core::capability::ParserResolution::Unsupported => Ok(()),
          knowdisk_core::capability::ParserResolution::Supported(parser) => self.processor.index_file(&job.path, parser).await.map(|_| ()),
        }
      }
      JobType::Reconcile => match &self.reconcile_hook {
        Some(hook) => hook.reconcile(&job.path).await,
        None => Ok(()),
      },
    }
  }

  async fn settle_failure(&self, job: JobRow, err: knowdisk_core::error::Error, now_ms: i64) -> bool {
    let message = err.to_string();
    let next_attempt = job.attempt + 1;

    if next_attempt >= self.config.max_attempts {
      if let Err(db_err) = self.db.fail_job(&job.job_id, next_attempt, &message, now_ms).await {
        error!(job_id = %job.job_id, error = %db_err, "failed to mark job failed");
      }
      if let Err(mark_err) = self.processor.mark_file_failed(&job.path, &message).await {
        error!(job_id = %job.job_id, error = %mark_err, "failed to mark file row failed");
      }
      self.events.on_job_error(&job, &message, true);
      false
    } else {
      let idx = (next_attempt as usize).saturating_sub(1).min(self.config.backoff_ms.len().saturating_sub(1));
      let delta = self.config.backoff_ms.get(idx).copied().unwrap_or(1_000) as i64;
      let next_run_at_ms = now_ms + delta;
      if let Err(db_err) = self.db.retry_job(&job.job_id, next_attempt, &message, next_run_at_ms, now_ms).await {
        error!(job_id = %job.job_id, error = %db_err, "failed to requeue job for retry");
      }
      self.events.on_job_error(&job, &message, false);
      true
    }
  }
}
