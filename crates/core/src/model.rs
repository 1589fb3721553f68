//! Data model for the indexing and retrieval subsystem.
//!
//! Identifiers are opaque strings derived deterministically from content, never
//! randomly generated: the same path or chunk span always resolves to the same
//! id across process restarts. Timestamps are milliseconds since epoch, always
//! supplied by a [`crate::capability::Clock`] rather than read from the system
//! clock directly.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Chunk text preview retained in vector metadata; full text lives in the FTS
/// store and/or on disk.
pub const VECTOR_PREVIEW_CHARS: usize = 200;

/// Derive the stable file identity from its absolute path.
pub fn file_id_for_path(path: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(path.as_bytes());
  format!("file_{:x}", hasher.finalize())
}

/// Derive the stable chunk identity from its file, span, and content hash.
pub fn chunk_id_for_span(file_id: &str, start_offset: Option<i64>, end_offset: Option<i64>, chunk_hash: &str) -> String {
  let start = start_offset.map(|v| v.to_string()).unwrap_or_default();
  let end = end_offset.map(|v| v.to_string()).unwrap_or_default();
  let mut hasher = Sha256::new();
  hasher.update(file_id.as_bytes());
  hasher.update(b"#");
  hasher.update(start.as_bytes());
  hasher.update(b"#");
  hasher.update(end.as_bytes());
  hasher.update(b"#");
  hasher.update(chunk_hash.as_bytes());
  let digest = format!("{:x}", hasher.finalize());
  format!("c_{}", &digest[..32])
}

/// SHA-256 of a chunk's text, used as `chunkHash`.
pub fn chunk_hash(text: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(text.as_bytes());
  format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
  Indexed,
  Indexing,
  Failed,
  Deleted,
  Ignored,
}

impl FileStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      FileStatus::Indexed => "indexed",
      FileStatus::Indexing => "indexing",
      FileStatus::Failed => "failed",
      FileStatus::Deleted => "deleted",
      FileStatus::Ignored => "ignored",
    }
  }
}

impl std::str::FromStr for FileStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "indexed" => Ok(FileStatus::Indexed),
      "indexing" => Ok(FileStatus::Indexing),
      "failed" => Ok(FileStatus::Failed),
      "deleted" => Ok(FileStatus::Deleted),
      "ignored" => Ok(FileStatus::Ignored),
      other => Err(format!("unknown file status: {other}")),
    }
  }
}

/// A known path on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRow {
  pub file_id: String,
  pub path: String,
  pub size: u64,
  pub mtime_ms: i64,
  pub inode: Option<u64>,
  pub status: FileStatus,
  pub last_index_time_ms: Option<i64>,
  pub last_error: Option<String>,
  pub created_at_ms: i64,
  pub updated_at_ms: i64,
}

impl FileRow {
  pub fn new(path: impl Into<String>, size: u64, mtime_ms: i64, now_ms: i64) -> Self {
    let path = path.into();
    let file_id = file_id_for_path(&path);
    Self {
      file_id,
      path,
      size,
      mtime_ms,
      inode: None,
      status: FileStatus::Indexing,
      last_index_time_ms: None,
      last_error: None,
      created_at_ms: now_ms,
      updated_at_ms: now_ms,
    }
  }

  /// Whether this row is up to date with the observed `size`/`mtime_ms`, per
  /// the processor's fast-skip rule.
  pub fn matches_disk_state(&self, size: u64, mtime_ms: i64) -> bool {
    self.status == FileStatus::Indexed && self.size == size && self.mtime_ms == mtime_ms
  }
}

/// A character range of a file, with a stable content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRow {
  pub chunk_id: String,
  pub file_id: String,
  pub source_path: String,
  pub start_offset: Option<i64>,
  pub end_offset: Option<i64>,
  pub chunk_hash: String,
  pub token_count: Option<i64>,
  pub updated_at_ms: i64,
}

impl ChunkRow {
  pub fn new(
    file_id: impl Into<String>,
    source_path: impl Into<String>,
    start_offset: Option<i64>,
    end_offset: Option<i64>,
    chunk_hash: impl Into<String>,
    token_count: Option<i64>,
    now_ms: i64,
  ) -> Self {
    let file_id = file_id.into();
    let chunk_hash = chunk_hash.into();
    let chunk_id = chunk_id_for_span(&file_id, start_offset, end_offset, &chunk_hash);
    Self {
      chunk_id,
      file_id,
      source_path: source_path.into(),
      start_offset,
      end_offset,
      chunk_hash,
      token_count,
      updated_at_ms: now_ms,
    }
  }

  /// Diff key within a file: `(startOffset, endOffset)`. Per the open question
  /// on null-offset representation, a missing offset is canonicalized to `-1`
  /// so that it participates in the key tuple deterministically rather than
  /// comparing as equal to every other missing offset by accident.
  pub fn offset_key(&self) -> (i64, i64) {
    (self.start_offset.unwrap_or(-1), self.end_offset.unwrap_or(-1))
  }
}

/// Lexical index row. Backed by an inverted-index virtual table with Unicode
/// tokenization and BM25 scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtsChunkRow {
  pub chunk_id: String,
  pub file_id: String,
  pub source_path: String,
  pub title: String,
  pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
  Index,
  Delete,
  Reconcile,
}

impl JobType {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobType::Index => "index",
      JobType::Delete => "delete",
      JobType::Reconcile => "reconcile",
    }
  }
}

impl std::str::FromStr for JobType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "index" => Ok(JobType::Index),
      "delete" => Ok(JobType::Delete),
      "reconcile" => Ok(JobType::Reconcile),
      other => Err(format!("unknown job type: {other}")),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Pending,
  Running,
  Done,
  Failed,
  Canceled,
}

impl JobStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Pending => "pending",
      JobStatus::Running => "running",
      JobStatus::Done => "done",
      JobStatus::Failed => "failed",
      JobStatus::Canceled => "canceled",
    }
  }
}

impl std::str::FromStr for JobStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(JobStatus::Pending),
      "running" => Ok(JobStatus::Running),
      "done" => Ok(JobStatus::Done),
      "failed" => Ok(JobStatus::Failed),
      "canceled" => Ok(JobStatus::Canceled),
      other => Err(format!("unknown job status: {other}")),
    }
  }
}

/// Unit of work for the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
  pub job_id: String,
  pub path: String,
  pub job_type: JobType,
  pub status: JobStatus,
  pub reason: String,
  pub attempt: u32,
  pub error: Option<String>,
  pub next_run_at_ms: i64,
  pub created_at_ms: i64,
  pub updated_at_ms: i64,
}

impl JobRow {
  pub fn new_pending(
    job_id: impl Into<String>,
    path: impl Into<String>,
    job_type: JobType,
    reason: impl Into<String>,
    next_run_at_ms: i64,
    now_ms: i64,
  ) -> Self {
    Self {
      job_id: job_id.into(),
      path: path.into(),
      job_type,
      status: JobStatus::Pending,
      reason: reason.into(),
      attempt: 0,
      error: None,
      next_run_at_ms,
      created_at_ms: now_ms,
      updated_at_ms: now_ms,
    }
  }
}

/// A user-requested source removal that must be honoured at next startup even
/// if the process crashed between the request and the deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTombstone {
  pub path: String,
  pub deleted_time_ms: i64,
}

/// A row crossing the `VectorStore` boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRow {
  pub chunk_id: String,
  pub vector: Vec<f32>,
  pub metadata: VectorRowMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRowMetadata {
  pub source_path: String,
  pub title: Option<String>,
  pub chunk_text: String,
  pub start_offset: Option<i64>,
  pub end_offset: Option<i64>,
  pub token_estimate: Option<i64>,
  pub updated_at: i64,
}

impl VectorRow {
  /// Build a vector row, truncating `full_text` to [`VECTOR_PREVIEW_CHARS`]
  /// for the bounded preview retained in metadata.
  pub fn new(chunk_id: impl Into<String>, vector: Vec<f32>, source_path: impl Into<String>, full_text: &str, start_offset: Option<i64>, end_offset: Option<i64>, token_estimate: Option<i64>, updated_at: i64) -> Self {
    let preview: String = full_text.chars().take(VECTOR_PREVIEW_CHARS).collect();
    Self {
      chunk_id: chunk_id.into(),
      vector,
      metadata: VectorRowMetadata {
        source_path: source_path.into(),
        title: None,
        chunk_text: preview,
        start_offset,
        end_offset,
        token_estimate,
        updated_at,
      },
    }
  }
}

/// A single row returned by [`crate::capability::VectorStore::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchRow {
  pub chunk_id: String,
  pub score: f32,
  pub metadata: VectorRowMetadata,
}

/// A row returned by a lexical (FTS) search. Lower `bm25` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtsSearchRow {
  pub chunk_id: String,
  pub source_path: String,
  pub title: String,
  pub text: String,
  pub bm25: f32,
}

/// The public shape returned by the retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
  pub chunk_id: String,
  pub source_path: String,
  pub chunk_text: String,
  pub score: f32,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_id_is_stable_for_same_path() {
    assert_eq!(file_id_for_path("/a/b.rs"), file_id_for_path("/a/b.rs"));
    assert_ne!(file_id_for_path("/a/b.rs"), file_id_for_path("/a/c.rs"));
    assert!(file_id_for_path("/a/b.rs").starts_with("file_"));
  }

  #[test]
  fn chunk_id_depends_on_full_span_and_hash() {
    let fid = file_id_for_path("/a/b.rs");
    let h1 = chunk_hash("alpha");
    let h2 = chunk_hash("beta");
    let a = chunk_id_for_span(&fid, Some(0), Some(5), &h1);
    let b = chunk_id_for_span(&fid, Some(0), Some(5), &h2);
    let c = chunk_id_for_span(&fid, Some(0), Some(6), &h1);
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, chunk_id_for_span(&fid, Some(0), Some(5), &h1));
    assert!(a.starts_with("c_"));
    assert_eq!(a.len(), 34); // "c_" + 32 hex chars
  }

  #[test]
  fn fast_skip_requires_indexed_status_and_matching_stat() {
    let row = FileRow {
      status: FileStatus::Indexed,
      size: 10,
      mtime_ms: 100,
      ..FileRow::new("/a", 10, 100, 0)
    };
    assert!(row.matches_disk_state(10, 100));
    assert!(!row.matches_disk_state(11, 100));
    assert!(!row.matches_disk_state(10, 101));

    let indexing_row = FileRow::new("/a", 10, 100, 0);
    assert!(!indexing_row.matches_disk_state(10, 100));
  }

  #[test]
  fn offset_key_distinguishes_missing_offsets_from_zero() {
    let fid = file_id_for_path("/a");
    let with_offsets = ChunkRow::new(&fid, "/a", Some(0), Some(10), "h", None, 0);
    let without_offsets = ChunkRow::new(&fid, "/a", None, None, "h", None, 0);
    assert_ne!(with_offsets.offset_key(), without_offsets.offset_key());
    assert_eq!(without_offsets.offset_key(), (-1, -1));
  }
}
