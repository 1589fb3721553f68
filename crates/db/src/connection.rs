use knowdisk_core::ProjectId;
use lancedb::{Connection, connect};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{DEFAULT_VECTOR_DIM, chunks_schema, files_schema, jobs_schema, meta_schema, tombstones_schema, vectors_schema};

#[derive(Error, Debug)]
pub enum DbError {
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("invalid input: {0}")]
  InvalidInput(String),
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for knowdisk_core::Error {
  fn from(err: DbError) -> Self {
    knowdisk_core::Error::Storage(err.to_string())
  }
}

/// Database connection for a specific project. Owns five durable metadata
/// tables (`files`, `chunks`, `jobs`, `tombstones`, `meta`) plus a `vectors`
/// table used only by [`crate::vectorstore::LanceVectorStore`] — kept
/// separate because `VectorStore` is an externally-injected capability, not
/// part of the repository's own concern.
pub struct ProjectDb {
  pub project_id: ProjectId,
  pub path: PathBuf,
  pub connection: Connection,
  pub vector_dim: usize,
  pub(crate) fts: std::sync::Arc<crate::fts::LexicalIndex>,
}

impl ProjectDb {
  /// Open or create a project database under the default data directory.
  pub async fn open(project_id: ProjectId, base_path: &std::path::Path) -> Result<Self> {
    let db_path = project_id.data_dir(base_path).join("lancedb");
    Self::open_at_path(project_id, db_path, DEFAULT_VECTOR_DIM).await
  }

  /// Open database at a specific path.
  pub async fn open_at_path(project_id: ProjectId, db_path: PathBuf, vector_dim: usize) -> Result<Self> {
    if let Some(parent) = db_path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    info!("Opening LanceDB at {:?}", db_path);
    let connection = connect(db_path.to_string_lossy().as_ref()).execute().await?;

    let db = Self {
      project_id,
      path: db_path,
      connection,
      vector_dim,
      fts: crate::fts::LexicalIndex::empty(),
    };

    db.ensure_tables().await?;
    db.rebuild_fts_index().await?;

    Ok(db)
  }

  /// Ensure all required tables exist.
  async fn ensure_tables(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;

    if !table_names.contains(&"files".to_string()) {
      debug!("Creating files table");
      self.connection.create_empty_table("files", files_schema()).execute().await?;
    }

    if !table_names.contains(&"chunks".to_string()) {
      debug!("Creating chunks table");
      self.connection.create_empty_table("chunks", chunks_schema()).execute().await?;
    }

    if !table_names.contains(&"jobs".to_string()) {
      debug!("Creating jobs table");
      self.connection.create_empty_table("jobs", jobs_schema()).execute().await?;
    }

    if !table_names.contains(&"tombstones".to_string()) {
      debug!("Creating tombstones table");
      self.connection.create_empty_table("tombstones", tombstones_schema()).execute().await?;
    }

    if !table_names.contains(&"meta".to_string()) {
      debug!("Creating meta table");
      self.connection.create_empty_table("meta", meta_schema()).execute().await?;
    }

    if !table_names.contains(&"vectors".to_string()) {
      debug!("Creating vectors table");
      self
        .connection
        .create_empty_table("vectors", vectors_schema(self.vector_dim))
        .execute()
        .await?;
    }

    Ok(())
  }

  pub async fn files_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("files").execute().await?)
  }

  pub async fn chunks_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("chunks").execute().await?)
  }

  pub async fn jobs_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("jobs").execute().await?)
  }

  pub async fn tombstones_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("tombstones").execute().await?)
  }

  pub async fn meta_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("meta").execute().await?)
  }

  pub async fn vectors_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("vectors").execute().await?)
  }

  /// Truncate every index-visible table (`files`, `chunks`, `jobs`,
  /// `tombstones`) and drop the in-memory lexical index, leaving schema and
  /// the `vectors` table untouched — per spec.md §4.6, the `VectorStore` is
  /// cleared by the caller (or by a subsequent rebuild), not by the
  /// repository itself.
  pub async fn clear_all_index_data(&self) -> Result<()> {
    self.clear_files().await?;
    self.clear_chunks().await?;
    self.clear_jobs().await?;
    self.clear_tombstones().await?;
    self.rebuild_fts_index().await?;
    Ok(())
  }
}

/// Get the default base path for knowdisk data.
///
/// Respects the following environment variables (in order of precedence):
/// 1. DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("knowdisk");
  }

  dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("knowdisk")
}

/// Get the default config directory.
///
/// Respects the following environment variables (in order of precedence):
/// 1. CONFIG_DIR - explicit config directory override
/// 2. XDG_CONFIG_HOME - standard XDG config home directory
/// 3. dirs::config_dir() - platform default
pub fn default_config_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("CONFIG_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg_config).join("knowdisk");
  }

  dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("knowdisk")
}

/// Get the default cache directory.
///
/// Respects the following environment variables (in order of precedence):
/// 1. XDG_CACHE_HOME - standard XDG cache home directory
/// 2. dirs::cache_dir() - platform default
pub fn default_cache_dir() -> PathBuf {
  if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
    return PathBuf::from(xdg_cache).join("knowdisk");
  }

  dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")).join("knowdisk")
}

/// Get the daemon's control-socket directory base, used by `knowdisk-daemon`'s
/// lifecycle module to derive a per-project socket path.
pub fn default_socket_dir() -> PathBuf {
  default_cache_dir().join("sock")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;
  use std::sync::Mutex;
  use tempfile::TempDir;

  static ENV_MUTEX: Mutex<()> = Mutex::new(());

  #[tokio::test]
  async fn test_open_database() {
    let temp_dir = TempDir::new().unwrap();
    let project_id = ProjectId::from_path(Path::new("/test/project"));

    let db = ProjectDb::open_at_path(project_id.clone(), temp_dir.path().join("test.lancedb"), 768)
      .await
      .unwrap();

    assert_eq!(db.project_id.as_str(), project_id.as_str());
  }

  #[tokio::test]
  async fn clear_all_index_data_truncates_metadata_but_keeps_vectors() {
    use crate::chunks::ChunkRecord;
    use knowdisk_core::model::{ChunkRow, FileRow, JobRow, JobType, SourceTombstone, VectorRow};

    let temp_dir = TempDir::new().unwrap();
    let project_id = ProjectId::from_path(Path::new("/test/clear"));
    let db = std::sync::Arc::new(ProjectDb::open_at_path(project_id, temp_dir.path().join("t.lancedb"), 4).await.unwrap());

    db.upsert_file(&FileRow::new("/a.rs", 10, 100, 1)).await.unwrap();
    db.upsert_chunks(&[ChunkRecord {
      row: ChunkRow::new("f1", "/a.rs", Some(0), Some(5), "h", Some(1), 1),
      title: "/a.rs".into(),
      text: "hello".into(),
    }])
    .await
    .unwrap();
    db.enqueue_job(&JobRow::new_pending("j1", "/a.rs", JobType::Index, "watcher_add", 0, 0)).await.unwrap();
    db.add_source_tombstone(&SourceTombstone { path: "/old".into(), deleted_time_ms: 1 }).await.unwrap();

    let store = crate::vectorstore::LanceVectorStore::new(std::sync::Arc::clone(&db));
    use knowdisk_core::capability::VectorStore;
    store.upsert(vec![VectorRow::new("c1", vec![1.0, 0.0, 0.0, 0.0], "/a.rs", "hello", Some(0), Some(5), Some(1), 1)]).await.unwrap();

    db.clear_all_index_data().await.unwrap();

    assert!(db.list_files(None).await.unwrap().is_empty());
    assert!(db.list_all_chunks().await.unwrap().is_empty());
    assert!(db.list_jobs(None).await.unwrap().is_empty());
    assert!(db.list_source_tombstones().await.unwrap().is_empty());
    assert!(db.search_fts("hello", 10).await.is_empty());
    assert_eq!(store.list_by_source_path("/a.rs").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_tables_created() {
    let temp_dir = TempDir::new().unwrap();
    let project_id = ProjectId::from_path(Path::new("/test/project"));

    let db = ProjectDb::open_at_path(project_id, temp_dir.path().join("test.lancedb"), 768)
      .await
      .unwrap();

    let tables = db.connection.table_names().execute().await.unwrap();
    assert!(tables.contains(&"files".to_string()));
    assert!(tables.contains(&"chunks".to_string()));
    assert!(tables.contains(&"jobs".to_string()));
    assert!(tables.contains(&"tombstones".to_string()));
    assert!(tables.contains(&"meta".to_string()));
    assert!(tables.contains(&"vectors".to_string()));
  }

  #[test]
  fn test_env_override_data_dir() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let original = std::env::var("DATA_DIR").ok();

    unsafe {
      std::env::set_var("DATA_DIR", "/custom/data/path");
    }
    let dir = default_data_dir();
    assert_eq!(dir, PathBuf::from("/custom/data/path"));

    if let Some(orig) = original {
      unsafe {
        std::env::set_var("DATA_DIR", orig);
      }
    } else {
      unsafe {
        std::env::remove_var("DATA_DIR");
      }
    }
  }

  #[test]
  fn test_env_override_config_dir() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let original = std::env::var("CONFIG_DIR").ok();

    unsafe {
      std::env::set_var("CONFIG_DIR", "/custom/config/path");
    }
    let dir = default_config_dir();
    assert_eq!(dir, PathBuf::from("/custom/config/path"));

    if let Some(orig) = original {
      unsafe {
        std::env::set_var("CONFIG_DIR", orig);
      }
    } else {
      unsafe {
        std::env::remove_var("CONFIG_DIR");
      }
    }
  }

  #[test]
  fn test_xdg_data_home() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let original_data_dir = std::env::var("DATA_DIR").ok();
    let original_xdg = std::env::var("XDG_DATA_HOME").ok();

    unsafe {
      std::env::remove_var("DATA_DIR");
    }

    unsafe {
      std::env::set_var("XDG_DATA_HOME", "/xdg/data");
    }
    let dir = default_data_dir();
    assert_eq!(dir, PathBuf::from("/xdg/data/knowdisk"));

    if let Some(orig) = original_data_dir {
      unsafe {
        std::env::set_var("DATA_DIR", orig);
      }
    } else {
      unsafe {
        std::env::remove_var("DATA_DIR");
      }
    }
    if let Some(orig) = original_xdg {
      unsafe {
        std::env::set_var("XDG_DATA_HOME", orig);
      }
    } else {
      unsafe {
        std::env::remove_var("XDG_DATA_HOME");
      }
    }
  }
}
