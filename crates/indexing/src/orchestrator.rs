//! Owns the user-facing run verbs and publishes an observable status
//! snapshot. Generalizes the teacher's `daemon/lifecycle.rs` wiring
//! (capability construction -> run loop -> signal-driven shutdown) into the
//! narrower shape this spec asks for: no process lifecycle here, just the
//! four run verbs plus deferred-deletion bookkeeping, fanned out to
//! subscribers the same way `daemon/scheduler.rs` logs its own status.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use knowdisk_core::capability::Clock;
use knowdisk_core::error::Result;
use knowdisk_core::model::{JobRow, JobType, SourceTombstone, file_id_for_path};
use knowdisk_db::ProjectDb;
use knowdisk_index::debounce::{DebounceConfig, Debouncer, FsEventKind};
use knowdisk_index::{ParserRegistry, Scanner};
use tracing::{debug, instrument};

use crate::worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
  Idle,
  Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
  Idle,
  Enqueueing,
  Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
  Idle,
  Indexing,
  Deleting,
  Failed,
}

#[derive(Debug, Clone)]
pub struct RunStatus {
  pub phase: RunPhase,
  pub reason: String,
  pub started_at: Option<i64>,
  pub finished_at: Option<i64>,
  pub last_reconcile_at: Option<i64>,
  pub indexed_files: usize,
  pub errors: Vec<String>,
}

impl Default for RunStatus {
  fn default() -> Self {
    Self {
      phase: RunPhase::Idle,
      reason: String::new(),
      started_at: None,
      finished_at: None,
      last_reconcile_at: None,
      indexed_files: 0,
      errors: Vec::new(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
  pub phase: SchedulerPhase,
  pub queue_depth: usize,
}

impl Default for SchedulerStatus {
  fn default() -> Self {
    Self { phase: SchedulerPhase::Idle, queue_depth: 0 }
  }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
  pub phase: Option<WorkerPhase>,
  pub running_workers: usize,
  pub current_files: Vec<String>,
  pub last_error: Option<String>,
}

/// Copy-on-read snapshot of the orchestrator's observable state.
#[derive(Debug, Clone, Default)]
pub struct IndexingStatus {
  pub run: RunStatus,
  pub scheduler: SchedulerStatus,
  pub worker: WorkerStatus,
}

/// Result of a [`Orchestrator::run_full_rebuild`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildOutcome {
  pub indexed_files: usize,
  pub errors: usize,
  pub repaired: usize,
}

type StatusSubscriber = Arc<dyn Fn(IndexingStatus) + Send + Sync>;

/// One filesystem change fed into [`Orchestrator::run_incremental`].
#[derive(Debug, Clone)]
pub struct IncrementalChange {
  pub path: PathBuf,
  pub kind: FsEventKind,
}

pub struct Orchestrator {
  db: Arc<ProjectDb>,
  worker: Arc<WorkerPool>,
  scanner: Scanner,
  parsers: Arc<ParserRegistry>,
  clock: Arc<dyn Clock>,
  source_paths: Vec<PathBuf>,
  debounce_ms: i64,
  scheduler: Mutex<Debouncer>,
  status: Mutex<IndexingStatus>,
  subscribers: Mutex<Vec<StatusSubscriber>>,
}

impl Orchestrator {
  pub fn new(
    db: Arc<ProjectDb>,
    worker: Arc<WorkerPool>,
    parsers: Arc<ParserRegistry>,
    clock: Arc<dyn Clock>,
    source_paths: Vec<PathBuf>,
    debounce_ms: i64,
  ) -> Self {
    Self {
      db,
      worker,
      scanner: Scanner::new(),
      parsers,
      clock,
      source_paths,
      debounce_ms,
      scheduler: Mutex::new(Debouncer::new(DebounceConfig { debounce_ms })),
      status: Mutex::new(IndexingStatus::default()),
      subscribers: Mutex::new(Vec::new()),
    }
  }

  pub fn status(&self) -> IndexingStatus {
    self.status.lock().unwrap().clone()
  }

  pub fn subscribe(&self, callback: StatusSubscriber) {
    self.subscribers.lock().unwrap().push(callback);
  }

  fn notify(&self) {
    let snapshot = self.status();
    let subscribers = self.subscribers.lock().unwrap();
    for subscriber in subscribers.iter() {
      subscriber(snapshot.clone());
    }
  }

  fn begin_run(&self, reason: &str) {
    let now = self.clock.now_ms();
    let mut status = self.status.lock().unwrap();
    status.run = RunStatus {
      phase: RunPhase::Running,
      reason: reason.to_string(),
      started_at: Some(now),
      finished_at: None,
      last_reconcile_at: status.run.last_reconcile_at,
      indexed_files: 0,
      errors: Vec::new(),
    };
    drop(status);
    self.notify();
  }

  fn finish_run(&self) {
    let now = self.clock.now_ms();
    {
      let mut status = self.status.lock().unwrap();
      status.run.phase = RunPhase::Idle;
      status.run.finished_at = Some(now);
      status.scheduler.phase = SchedulerPhase::Idle;
      status.worker.phase = None;
    }
    self.notify();
  }

  /// Walk every enabled source path, stat each indexable file, and enqueue
  /// `index`/`delete` jobs for anything that differs from the repository's
  /// last-known state. Returns the number of jobs enqueued.
  #[instrument(level = "debug", skip(self))]
  async fn enqueue_reconcile_jobs(&self, reason: &str) -> Result<usize> {
    {
      let mut status = self.status.lock().unwrap();
      status.scheduler.phase = SchedulerPhase::Enqueueing;
    }
    self.notify();

    let mut seen_ids = std::collections::HashSet::new();
    let mut enqueued = 0;
    let now = self.clock.now_ms();

    for root in &self.source_paths {
      let result = self.scanner.scan(root, &self.parsers, |_| {});
      for file in result.files {
        let path = file.path.to_string_lossy().to_string();
        let file_id = file_id_for_path(&path);
        seen_ids.insert(file_id.clone());

        let existing = self.db.get_file_by_path(&path).await?;
        let needs_index = match &existing {
          None => true,
          Some(row) => !row.matches_disk_state(file.size, file.mtime_ms),
        };
        if needs_index {
          let job = JobRow::new_pending(format!("reconcile-index-{file_id}"), path, JobType::Index, reason, now, now);
          self.db.enqueue_job(&job).await?;
          enqueued += 1;
        }
      }
    }

    for row in self.db.list_files(None).await? {
      if row.status == knowdisk_core::model::FileStatus::Deleted {
        continue;
      }
      if !seen_ids.contains(&row.file_id) && !Path::new(&row.path).exists() {
        let job = JobRow::new_pending(format!("reconcile-delete-{}", row.file_id), row.path.clone(), JobType::Delete, reason, now, now);
        self.db.enqueue_job(&job).await?;
        enqueued += 1;
      }
    }

    debug!(enqueued, "reconcile enqueued jobs");
    Ok(enqueued)
  }

  /// Drain the scheduler and worker queue together until both report no
  /// outstanding work.
  #[instrument(level = "debug", skip(self))]
  async fn drain_worker_queue(&self) -> Result<(usize, Vec<String>)> {
    {
      let mut status = self.status.lock().unwrap();
      status.scheduler.phase = SchedulerPhase::Draining;
    }
    self.notify();

    let mut indexed_files = 0;
    loop {
      let now = self.clock.now_ms();
      let flushed = self.scheduler.lock().unwrap().flush_due(now);
      for job in &flushed {
        let path = job.path.to_string_lossy().to_string();
        let pending = JobRow::new_pending(format!("sched-{path}-{now}"), path, job.job_type, job.reason, now, now);
        self.db.enqueue_job(&pending).await?;
      }

      let stats = self.worker.run_once(now).await?;
      indexed_files += stats.settled.saturating_sub(stats.retried);
      {
        let queue_depth = self.scheduler.lock().unwrap().pending_count();
        let mut status = self.status.lock().unwrap();
        status.scheduler.queue_depth = queue_depth;
      }

      let pending_count = self.scheduler.lock().unwrap().pending_count();
      if flushed.is_empty() && stats.claimed == 0 && pending_count == 0 {
        break;
      }
    }

    let failed = self.db.list_files(Some(knowdisk_core::model::FileStatus::Failed)).await?;
    let errors: Vec<String> = failed.iter().filter_map(|row| row.last_error.clone()).collect();
    Ok((indexed_files, errors))
  }

  /// Full rebuild: reconcile every source path against disk, then drain.
  #[instrument(level = "info", skip(self))]
  pub async fn run_full_rebuild(&self, reason: &str) -> Result<RebuildOutcome> {
    self.begin_run(reason);
    let repaired = self.enqueue_reconcile_jobs(reason).await?;
    let (indexed_files, errors) = self.drain_worker_queue().await?;
    let error_count = errors.len();
    {
      let mut status = self.status.lock().unwrap();
      status.run.indexed_files = indexed_files;
      status.run.errors = errors;
    }
    self.finish_run();
    Ok(RebuildOutcome { indexed_files, errors: error_count, repaired })
  }

  /// Feed a burst of filesystem changes through the scheduler with an
  /// event time far enough in the past to force an immediate flush, then
  /// drain.
  #[instrument(level = "info", skip(self, changes))]
  pub async fn run_incremental(&self, changes: &[IncrementalChange]) -> Result<RebuildOutcome> {
    self.begin_run("incremental");
    let now = self.clock.now_ms();
    let forced_event_at = now - self.debounce_ms - 1;
    {
      let mut scheduler = self.scheduler.lock().unwrap();
      for change in changes {
        scheduler.on_fs_event(&change.path, change.kind, forced_event_at);
      }
    }
    let (indexed_files, errors) = self.drain_worker_queue().await?;
    let error_count = errors.len();
    {
      let mut status = self.status.lock().unwrap();
      status.run.indexed_files = indexed_files;
      status.run.errors = errors;
    }
    self.finish_run();
    Ok(RebuildOutcome { indexed_files, errors: error_count, repaired: 0 })
  }

  /// Identical to a reconcile-only pass: enqueue reconcile jobs, drain, and
  /// record `lastReconcileAt`.
  #[instrument(level = "info", skip(self))]
  pub async fn run_scheduled_reconcile(&self) -> Result<RebuildOutcome> {
    self.begin_run("scheduled_reconcile");
    let repaired = self.enqueue_reconcile_jobs("scheduled_reconcile").await?;
    let (indexed_files, errors) = self.drain_worker_queue().await?;
    let error_count = errors.len();
    let now = self.clock.now_ms();
    {
      let mut status = self.status.lock().unwrap();
      status.run.indexed_files = indexed_files;
      status.run.errors = errors;
      status.run.last_reconcile_at = Some(now);
    }
    self.finish_run();
    Ok(RebuildOutcome { indexed_files, errors: error_count, repaired })
  }

  pub async fn defer_source_deletion(&self, path: &str) -> Result<()> {
    let now = self.clock.now_ms();
    self.db.add_source_tombstone(&SourceTombstone { path: path.to_string(), deleted_time_ms: now }).await
  }

  pub async fn cancel_deferred_source_deletion(&self, path: &str) -> Result<()> {
    self.db.remove_source_tombstone(path).await
  }

  /// At startup: turn every tombstoned source path into `delete` jobs for
  /// itself and every known descendant file, drain, then clear tombstones.
  #[instrument(level = "info", skip(self))]
  pub async fn purge_deferred_source_deletions(&self) -> Result<RebuildOutcome> {
    self.begin_run("purge_tombstones");
    let tombstones = self.db.list_source_tombstones().await?;
    let now = self.clock.now_ms();
    let mut repaired = 0;
    for tombstone in &tombstones {
      for row in self.db.list_files(None).await? {
        if row.path == tombstone.path || row.path.starts_with(&format!("{}/", tombstone.path)) {
          let job = JobRow::new_pending(format!("purge-{}", row.file_id), row.path.clone(), JobType::Delete, "tombstone_purge", now, now);
          self.db.enqueue_job(&job).await?;
          repaired += 1;
        }
      }
    }
    let (indexed_files, errors) = self.drain_worker_queue().await?;
    let error_count = errors.len();
    {
      let mut status = self.status.lock().unwrap();
      status.run.indexed_files = indexed_files;
      status.run.errors = errors;
    }
    for tombstone in &tombstones {
      self.db.remove_source_tombstone(&tombstone.path).await?;
    }
    self.finish_run();
    Ok(RebuildOutcome { indexed_files, errors: error_count, repaired })
  }

  /// Repository-level truncate. Never touches the `VectorStore`: either the
  /// caller clears it separately or a subsequent rebuild repairs it.
  pub async fn clear_all_index_data(&self) -> Result<()> {
    self.db.clear_all_index_data().await?;
    let mut status = self.status.lock().unwrap();
    *status = IndexingStatus::default();
    Ok(())
  }

  pub async fn start(&self) -> Result<usize> {
    self.worker.start().await?;
    self.purge_deferred_source_deletions().await.map(|outcome| outcome.repaired)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::processor::Processor;
  use async_trait::async_trait;
  use knowdisk_core::capability::{Embedder, SystemClock, VectorStore};
  use knowdisk_core::config::WorkerConfig;
  use knowdisk_core::ProjectId;
  use tempfile::TempDir;

  struct FixedEmbedder;
  #[async_trait]
  impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
      Ok(vec![text.len() as f32, 0.0, 0.0, 0.0])
    }
  }

  async fn test_orchestrator(temp: &TempDir, source_root: &Path) -> (Arc<ProjectDb>, Orchestrator) {
    let project_id = ProjectId::from_path(Path::new("/test/orchestrator"));
    let db = Arc::new(ProjectDb::open_at_path(project_id, temp.path().join("t.lancedb"), 4).await.unwrap());
    let vectors: Arc<dyn VectorStore> = Arc::new(knowdisk_db::LanceVectorStore::new(Arc::clone(&db)));
    let processor = Arc::new(Processor::new(
      Arc::clone(&db),
      vectors,
      Arc::new(FixedEmbedder),
      knowdisk_index::ChunkerConfig::new(1000, 0, 4),
      Arc::new(SystemClock),
    ));
    let parsers = Arc::new(ParserRegistry::with_defaults());
    let worker = Arc::new(WorkerPool::new(Arc::clone(&db), processor, Arc::clone(&parsers), Arc::new(SystemClock), WorkerConfig::default()));
    let orchestrator = Orchestrator::new(Arc::clone(&db), worker, parsers, Arc::new(SystemClock), vec![source_root.to_path_buf()], 500);
    (db, orchestrator)
  }

  #[tokio::test]
  async fn run_full_rebuild_indexes_every_file_once() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("a.rs"), "fn a() {}").unwrap();
    std::fs::write(src.join("b.rs"), "fn b() {}").unwrap();

    let (db, orchestrator) = test_orchestrator(&temp, &src).await;
    let outcome = orchestrator.run_full_rebuild("manual").await.unwrap();
    assert_eq!(outcome.repaired, 2);
    assert_eq!(outcome.errors, 0);

    let files = db.list_files(Some(knowdisk_core::model::FileStatus::Indexed)).await.unwrap();
    assert_eq!(files.len(), 2);
  }

  #[tokio::test]
  async fn s7_reconcile_removes_deleted_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    std::fs::create_dir(&src).unwrap();
    let doomed = src.join("x.md");
    std::fs::write(&doomed, "hello").unwrap();

    let (db, orchestrator) = test_orchestrator(&temp, &src).await;
    orchestrator.run_full_rebuild("manual").await.unwrap();
    assert!(db.get_file_by_path(&doomed.to_string_lossy()).await.unwrap().is_some());

    std::fs::remove_file(&doomed).unwrap();
    let outcome = orchestrator.run_full_rebuild("manual").await.unwrap();
    assert_eq!(outcome.repaired, 1);

    let row = db.get_file_by_path(&doomed.to_string_lossy()).await.unwrap().unwrap();
    assert_eq!(row.status, knowdisk_core::model::FileStatus::Deleted);

    let vectors = knowdisk_db::LanceVectorStore::new(Arc::clone(&db));
    let rows = vectors.list_by_source_path(&doomed.to_string_lossy()).await.unwrap();
    assert!(rows.is_empty());
  }

  #[tokio::test]
  async fn defer_then_cancel_deletion_leaves_no_tombstone() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    std::fs::create_dir(&src).unwrap();
    let (db, orchestrator) = test_orchestrator(&temp, &src).await;

    orchestrator.defer_source_deletion("/project/docs").await.unwrap();
    assert_eq!(db.list_source_tombstones().await.unwrap().len(), 1);
    orchestrator.cancel_deferred_source_deletion("/project/docs").await.unwrap();
    assert!(db.list_source_tombstones().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn purge_deferred_deletions_removes_descendant_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    std::fs::create_dir(&src).unwrap();
    let docs = src.join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(docs.join("a.md"), "hello").unwrap();

    let (db, orchestrator) = test_orchestrator(&temp, &src).await;
    orchestrator.run_full_rebuild("manual").await.unwrap();

    orchestrator.defer_source_deletion(&docs.to_string_lossy()).await.unwrap();
    let outcome = orchestrator.purge_deferred_source_deletions().await.unwrap();
    assert_eq!(outcome.repaired, 1);
    assert!(db.list_source_tombstones().await.unwrap().is_empty());

    let row = db.get_file_by_path(&docs.join("a.md").to_string_lossy()).await.unwrap().unwrap();
    assert_eq!(row.status, knowdisk_core::model::FileStatus::Deleted);
  }

  #[tokio::test]
  async fn clear_all_index_data_resets_status_and_repository() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("a.rs"), "fn a() {}").unwrap();
    let (db, orchestrator) = test_orchestrator(&temp, &src).await;
    orchestrator.run_full_rebuild("manual").await.unwrap();

    orchestrator.clear_all_index_data().await.unwrap();
    assert!(db.list_files(None).await.unwrap().is_empty());
    assert_eq!(orchestrator.status().run.indexed_files, 0);
  }

  #[tokio::test]
  async fn status_notifications_fire_on_run() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("a.rs"), "fn a() {}").unwrap();
    let (_, orchestrator) = test_orchestrator(&temp, &src).await;

    let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen2 = Arc::clone(&seen);
    orchestrator.subscribe(Arc::new(move |_snapshot: IndexingStatus| {
      seen2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    orchestrator.run_full_rebuild("manual").await.unwrap();
    assert!(seen.load(std::sync::atomic::Ordering::SeqCst) > 0);
  }
}
