//! Per-project capability bundle and registry. Generalizes the teacher's
//! `ProjectRegistry` (one memory store per project, keyed by project id) into
//! a bundle of the full indexing+retrieval stack a single project needs:
//! repository, vector store, embedder, processor, worker pool, orchestrator,
//! and retrieval pipeline, all wired once and cached for the life of the
//! daemon process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use knowdisk_core::capability::{Clock, Embedder, SystemClock, VectorStore};
use knowdisk_core::config::Config;
use knowdisk_core::error::Result;
use knowdisk_core::project::{ProjectId, resolve_project_path};
use knowdisk_db::{LanceVectorStore, ProjectDb};
use knowdisk_index::{ChunkerConfig, FileWatcher, ParserRegistry};
use knowdisk_indexing::{Orchestrator, Processor, WorkerPool};
use knowdisk_retrieval::RetrievalPipeline;
use tracing::warn;

use crate::source_reader::FsSourceReader;

/// Everything a single project needs to index and serve itself, wired once
/// at first access and shared by every subsequent request against it.
pub struct ProjectHandle {
  pub project_id: ProjectId,
  pub project_path: PathBuf,
  pub config: Config,
  pub db: Arc<ProjectDb>,
  pub orchestrator: Arc<Orchestrator>,
  pub retrieval: Arc<RetrievalPipeline>,
  pub watcher: Mutex<Option<FileWatcher>>,
  next_reconcile_at_ms: Mutex<i64>,
}

impl ProjectHandle {
  async fn open(project_path: PathBuf, data_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
    let project_id = ProjectId::from_path(&project_path);
    let config = Config::load_for_project(&project_path);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db = Arc::new(ProjectDb::open(project_id.clone(), data_dir).await?);
    let vector_store: Arc<dyn VectorStore> = Arc::new(LanceVectorStore::new(Arc::clone(&db)));
    let parsers = Arc::new(ParserRegistry::with_defaults());

    let chunker_config = ChunkerConfig::new(1000, 100, 4);
    let processor = Arc::new(Processor::new(Arc::clone(&db), Arc::clone(&vector_store), Arc::clone(&embedder), chunker_config, Arc::clone(&clock)));
    let worker = Arc::new(WorkerPool::new(Arc::clone(&db), processor, Arc::clone(&parsers), Arc::clone(&clock), config.indexing.worker.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
      Arc::clone(&db),
      worker,
      parsers,
      Arc::clone(&clock),
      vec![project_path.clone()],
      config.indexing.watch.debounce_ms as i64,
    ));

    let retrieval = Arc::new(
      RetrievalPipeline::new(embedder, vector_store, Arc::clone(&db), config.retrieval.clone()).with_source_reader(Arc::new(FsSourceReader)),
    );

    let watcher = match FileWatcher::new(&project_path) {
      Ok(watcher) => Some(watcher),
      Err(err) => {
        warn!(path = %project_path.display(), error = %err, "failed to start filesystem watcher for project");
        None
      }
    };

    let now = clock.now_ms();
    Ok(Self {
      project_id,
      project_path,
      config,
      db,
      orchestrator,
      retrieval,
      watcher: Mutex::new(watcher),
      next_reconcile_at_ms: Mutex::new(now),
    })
  }

  /// Whether this project's next scheduled reconcile is due, advancing the
  /// due time on every call that returns `true`.
  pub fn reconcile_due(&self, now_ms: i64) -> bool {
    let mut next = self.next_reconcile_at_ms.lock().unwrap();
    if now_ms < *next {
      return false;
    }
    let interval = self.config.indexing.reconcile_interval_ms.max(1) as i64;
    *next = now_ms + interval;
    true
  }
}

/// Holds one [`ProjectHandle`] per distinct project root, keyed by
/// [`ProjectId`] so repeated lookups from any subdirectory resolve to the
/// same handle.
pub struct ProjectRegistry {
  data_dir: PathBuf,
  embedder: Arc<dyn Embedder>,
  projects: Mutex<HashMap<ProjectId, Arc<ProjectHandle>>>,
}

impl ProjectRegistry {
  pub fn new(data_dir: PathBuf, embedder: Arc<dyn Embedder>) -> Self {
    Self { data_dir, embedder, projects: Mutex::new(HashMap::new()) }
  }

  /// Resolve `path` to its project root and return the cached handle,
  /// opening and indexing-starting a new one on first access.
  pub async fn get_or_create(&self, path: &Path) -> Result<Arc<ProjectHandle>> {
    let project_path = resolve_project_path(path);
    let project_id = ProjectId::from_path(&project_path);

    if let Some(existing) = self.projects.lock().unwrap().get(&project_id) {
      return Ok(Arc::clone(existing));
    }

    let handle = Arc::new(ProjectHandle::open(project_path, &self.data_dir, Arc::clone(&self.embedder)).await?);
    handle.orchestrator.start().await?;
    self.projects.lock().unwrap().insert(project_id, Arc::clone(&handle));
    Ok(handle)
  }

  /// Snapshot of every project opened so far, for the scheduler's periodic
  /// watch-poll and reconcile sweeps.
  pub fn snapshot(&self) -> Vec<Arc<ProjectHandle>> {
    self.projects.lock().unwrap().values().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use tempfile::TempDir;

  struct FixedEmbedder;
  #[async_trait]
  impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
      Ok(vec![text.len() as f32, 0.0, 0.0, 0.0])
    }
  }

  #[tokio::test]
  async fn get_or_create_caches_by_project_root() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();
    let project_root = temp.path().join("proj");
    std::fs::create_dir_all(project_root.join("src")).unwrap();

    let registry = ProjectRegistry::new(data_dir, Arc::new(FixedEmbedder));
    let a = registry.get_or_create(&project_root).await.unwrap();
    let b = registry.get_or_create(&project_root.join("src")).await.unwrap();
    assert_eq!(a.project_id, b.project_id);
    assert_eq!(registry.snapshot().len(), 1);
  }
}
