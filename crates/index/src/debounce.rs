//! In-memory event debouncer. Collapses bursts of filesystem events into at
//! most one pending job per path, with a trailing debounce window and a
//! delete-sticky coalescing policy. Touches no durable storage itself: the
//! orchestrator is responsible for turning a flushed entry into an enqueued
//! job via the repository.

use knowdisk_core::model::JobType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Raw event kind observed from the watcher, before debounce mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
  Add,
  Change,
  Unlink,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingJob {
  job_type: JobType,
  reason: &'static str,
  due_at_ms: i64,
}

/// A flushed debounce entry, ready to become a queued job.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedJob {
  pub path: PathBuf,
  pub job_type: JobType,
  pub reason: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
  pub debounce_ms: i64,
}

impl Default for DebounceConfig {
  fn default() -> Self {
    Self { debounce_ms: 500 }
  }
}

/// Pure in-memory scheduler: `path -> PendingJob`. Owned by the orchestrator
/// thread; never shared across process boundaries.
#[derive(Debug, Default)]
pub struct Debouncer {
  config: DebounceConfig,
  pending: HashMap<PathBuf, PendingJob>,
}

impl Debouncer {
  pub fn new(config: DebounceConfig) -> Self {
    Self { config, pending: HashMap::new() }
  }

  /// Record one filesystem event, resetting the due time on trailing debounce
  /// and escalating to `delete` if either the new or the previously-pending
  /// event was an unlink (delete is sticky).
  pub fn on_fs_event(&mut self, path: impl AsRef<Path>, event: FsEventKind, now_ms: i64) {
    let path = path.as_ref().to_path_buf();
    let (incoming_type, incoming_reason) = match event {
      FsEventKind::Add => (JobType::Index, "watcher_add"),
      FsEventKind::Change => (JobType::Index, "watcher_change"),
      FsEventKind::Unlink => (JobType::Delete, "watcher_unlink"),
    };

    let due_at_ms = now_ms + self.config.debounce_ms;
    self
      .pending
      .entry(path)
      .and_modify(|entry| {
        if entry.job_type != JobType::Delete {
          entry.job_type = incoming_type;
          entry.reason = incoming_reason;
        }
        entry.due_at_ms = due_at_ms;
      })
      .or_insert(PendingJob { job_type: incoming_type, reason: incoming_reason, due_at_ms });
  }

  /// Remove and return every entry whose due time has passed, at most one
  /// per path. Returns an empty vec when nothing is due — this never touches
  /// durable storage; the caller enqueues the returned jobs itself.
  pub fn flush_due(&mut self, now_ms: i64) -> Vec<FlushedJob> {
    let due_paths: Vec<PathBuf> =
      self.pending.iter().filter(|(_, job)| job.due_at_ms <= now_ms).map(|(path, _)| path.clone()).collect();

    let mut flushed = Vec::with_capacity(due_paths.len());
    for path in due_paths {
      if let Some(job) = self.pending.remove(&path) {
        flushed.push(FlushedJob { path, job_type: job.job_type, reason: job.reason });
      }
    }
    flushed
  }

  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn debounce_coalesces_a_burst_into_one_job() {
    let mut debouncer = Debouncer::new(DebounceConfig { debounce_ms: 500 });
    debouncer.on_fs_event("/docs/a.md", FsEventKind::Change, 1000);
    debouncer.on_fs_event("/docs/a.md", FsEventKind::Change, 1200);
    debouncer.on_fs_event("/docs/a.md", FsEventKind::Change, 1300);

    assert!(debouncer.flush_due(1700).is_empty());
    let flushed = debouncer.flush_due(1801);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].job_type, JobType::Index);
    assert_eq!(flushed[0].reason, "watcher_change");
  }

  #[test]
  fn unlink_wins_over_a_pending_change() {
    let mut debouncer = Debouncer::new(DebounceConfig { debounce_ms: 500 });
    debouncer.on_fs_event("/docs/a.md", FsEventKind::Change, 1000);
    debouncer.on_fs_event("/docs/a.md", FsEventKind::Unlink, 1100);

    let flushed = debouncer.flush_due(1601);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].job_type, JobType::Delete);
    assert_eq!(flushed[0].reason, "watcher_unlink");
  }

  #[test]
  fn unlink_stays_sticky_even_if_a_change_follows() {
    let mut debouncer = Debouncer::new(DebounceConfig { debounce_ms: 500 });
    debouncer.on_fs_event("/a.rs", FsEventKind::Unlink, 1000);
    debouncer.on_fs_event("/a.rs", FsEventKind::Change, 1100);

    let flushed = debouncer.flush_due(1601);
    assert_eq!(flushed[0].job_type, JobType::Delete);
  }

  #[test]
  fn distinct_paths_flush_independently() {
    let mut debouncer = Debouncer::new(DebounceConfig { debounce_ms: 100 });
    debouncer.on_fs_event("/a.rs", FsEventKind::Add, 0);
    debouncer.on_fs_event("/b.rs", FsEventKind::Add, 50);

    let flushed = debouncer.flush_due(100);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].path, PathBuf::from("/a.rs"));

    let flushed = debouncer.flush_due(150);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].path, PathBuf::from("/b.rs"));
  }

  #[test]
  fn no_events_means_no_flushed_jobs() {
    let mut debouncer = Debouncer::new(DebounceConfig::default());
    assert_eq!(debouncer.flush_due(1_000_000), Vec::new());
  }

  #[test]
  fn pending_count_reflects_unflushed_entries() {
    let mut debouncer = Debouncer::new(DebounceConfig { debounce_ms: 500 });
    debouncer.on_fs_event("/a.rs", FsEventKind::Add, 0);
    assert_eq!(debouncer.pending_count(), 1);
    debouncer.flush_due(500);
    assert_eq!(debouncer.pending_count(), 0);
  }
}
