//! Background task scheduler. Generalizes the teacher's two-timer
//! `tokio::select!` loop (there: decay + stale-session cleanup) into this
//! daemon's own pair of timers: a frequent watch-poll that drains each
//! project's [`FileWatcher`] into `run_incremental`, and a less frequent
//! reconcile check that fires `run_scheduled_reconcile` once a project's
//! configured interval has elapsed.

use std::sync::Arc;
use std::time::Duration;

use knowdisk_index::watcher::ChangeKind;
use knowdisk_indexing::orchestrator::IncrementalChange;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::project::ProjectRegistry;

const RECONCILE_CHECK_INTERVAL_MS: u64 = 5_000;

pub struct Scheduler {
  registry: Arc<ProjectRegistry>,
  watch_poll_ms: u64,
  shutdown_rx: broadcast::Receiver<()>,
}

impl Scheduler {
  pub fn new(registry: Arc<ProjectRegistry>, watch_poll_ms: u64, shutdown_rx: broadcast::Receiver<()>) -> Self {
    Self { registry, watch_poll_ms, shutdown_rx }
  }

  pub async fn run(mut self) {
    let mut watch_timer = interval(Duration::from_millis(self.watch_poll_ms.max(1)));
    let mut reconcile_timer = interval(Duration::from_millis(RECONCILE_CHECK_INTERVAL_MS));
    watch_timer.tick().await;
    reconcile_timer.tick().await;

    loop {
      tokio::select! {
        _ = watch_timer.tick() => self.poll_watchers().await,
        _ = reconcile_timer.tick() => self.check_reconcile_due().await,
        _ = self.shutdown_rx.recv() => {
          debug!("scheduler received shutdown signal");
          break;
        }
      }
    }
  }

  async fn poll_watchers(&self) {
    for project in self.registry.snapshot() {
      let changes: Vec<IncrementalChange> = {
        let guard = project.watcher.lock().unwrap();
        match guard.as_ref() {
          Some(watcher) => watcher
            .collect_pending()
            .into_iter()
            .map(|change| IncrementalChange {
              path: change.path,
              kind: match change.kind {
                ChangeKind::Created => knowdisk_index::debounce::FsEventKind::Add,
                ChangeKind::Modified | ChangeKind::Renamed => knowdisk_index::debounce::FsEventKind::Change,
                ChangeKind::Deleted => knowdisk_index::debounce::FsEventKind::Unlink,
              },
            })
            .collect(),
          None => Vec::new(),
        }
      };
      if changes.is_empty() {
        continue;
      }
      debug!(project = %project.project_id.as_str(), count = changes.len(), "feeding watched changes into incremental run");
      if let Err(err) = project.orchestrator.run_incremental(&changes).await {
        error!(project = %project.project_id.as_str(), error = %err, "incremental run failed");
      }
    }
  }

  async fn check_reconcile_due(&self) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    for project in self.registry.snapshot() {
      if !project.reconcile_due(now_ms) {
        continue;
      }
      info!(project = %project.project_id.as_str(), "running scheduled reconcile");
      if let Err(err) = project.orchestrator.run_scheduled_reconcile().await {
        error!(project = %project.project_id.as_str(), error = %err, "scheduled reconcile failed");
      }
    }
  }
}

pub fn spawn_scheduler(registry: Arc<ProjectRegistry>, watch_poll_ms: u64, shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
  let scheduler = Scheduler::new(registry, watch_poll_ms, shutdown_rx);
  tokio::spawn(async move {
    scheduler.run().await;
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use knowdisk_core::capability::Embedder;
  use std::time::Duration as StdDuration;
  use tempfile::TempDir;

  struct FixedEmbedder;
  #[async_trait]
  impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> knowdisk_core::error::Result<Vec<f32>> {
      Ok(vec![text.len() as f32, 0.0, 0.0, 0.0])
    }
  }

  #[tokio::test]
  async fn scheduler_stops_cleanly_on_shutdown_signal() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();
    let registry = Arc::new(ProjectRegistry::new(data_dir, Arc::new(FixedEmbedder)));

    let (tx, rx) = broadcast::channel(1);
    let handle = spawn_scheduler(registry, 50, rx);
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    tx.send(()).unwrap();
    tokio::time::timeout(StdDuration::from_secs(2), handle).await.unwrap().unwrap();
  }
}
