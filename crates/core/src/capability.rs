//! Capability contracts consumed by the core. Concrete adapters (a real
//! embedder, a real vector store, ...) are wired in by the composition root;
//! the core only ever sees these trait objects, never a concrete provider.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{FtsSearchRow, VectorRow, VectorRowMetadata, VectorSearchRow};

/// Text → vector. A fixed dimension per provider.
#[async_trait]
pub trait Embedder: Send + Sync {
  async fn embed(&self, text: &str) -> Result<Vec<f32>>;

  /// Dimensionality of vectors produced by this embedder, when known without
  /// calling the model (used to validate stored vector widths on startup).
  fn dimensions(&self) -> Option<usize> {
    None
  }
}

/// Query + rows → reordered rows. MUST return rows in descending score order.
#[async_trait]
pub trait Reranker: Send + Sync {
  async fn rerank(&self, query: &str, rows: Vec<VectorSearchRow>, top_k: usize) -> Result<Vec<VectorSearchRow>>;
}

/// The dense vector index. Implementations own their own durability.
#[async_trait]
pub trait VectorStore: Send + Sync {
  /// Replace-by-`chunkId`; idempotent.
  async fn upsert(&self, rows: Vec<VectorRow>) -> Result<()>;

  /// Cosine similarity search; higher score is better.
  async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorSearchRow>>;

  /// All rows for a given source path.
  async fn list_by_source_path(&self, path: &str) -> Result<Vec<VectorSearchRow>>;

  /// Remove all rows for a given source path.
  async fn delete_by_source_path(&self, path: &str) -> Result<()>;

  /// Drop the entire collection (used by "force resync").
  async fn destroy(&self) -> Result<()>;
}

/// One parsed segment of a file, as handed to the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSegment {
  pub text: String,
  pub start_offset: i64,
  pub end_offset: i64,
  pub token_estimate: i64,
  pub skipped: Option<String>,
}

/// Byte stream → text spans with offsets. Resolved via an extension-indexed
/// lookup; files with no registered parser resolve to [`ParserResolution::Unsupported`]
/// rather than falling back to reflection or content sniffing.
#[async_trait]
pub trait Parser: Send + Sync {
  async fn parse_stream(&self, bytes: &[u8]) -> Result<Vec<ParsedSegment>>;

  /// Read a text range back out of the source for hydration; default
  /// implementation decodes the whole byte slice as UTF-8 and slices it.
  fn read_range(&self, full_text: &str, start: usize, end: usize) -> String {
    full_text.chars().skip(start).take(end.saturating_sub(start)).collect()
  }
}

/// Result of resolving a [`Parser`] for a path's extension.
pub enum ParserResolution<'a> {
  Supported(&'a dyn Parser),
  Unsupported,
}

/// Injected time source; every timestamp in the data model flows through
/// this rather than reading the system clock directly, so that scheduler and
/// worker tests can advance time deterministically.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> i64;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> i64 {
    chrono::Utc::now().timestamp_millis()
  }
}

/// Read back full text for a source path, used by the retrieval pipeline to
/// hydrate stored previews into full chunk text when offsets are known.
pub trait SourceReader: Send + Sync {
  fn read_range(&self, path: &str, start: i64, end: i64) -> Option<String>;
}

/// Convenience to turn a metadata-only search row into a preview-bounded
/// [`crate::model::RetrievalResult`]-adjacent tuple; kept here since several
/// crates (retrieval, indexing) need the same bound.
pub fn metadata_preview(metadata: &VectorRowMetadata) -> &str {
  &metadata.chunk_text
}


// Silence an otherwise-unused-import warning when FtsSearchRow is only used
// by downstream crates through this module's re-export surface.
#[allow(unused_imports)]
use FtsSearchRow as _FtsSearchRowReexport;
