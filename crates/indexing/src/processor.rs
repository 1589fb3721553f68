//! Stat → parse → chunk → diff → minimal upsert across the chunk, FTS, and
//! vector stores. The processor never retains mutable state across calls:
//! every [`Processor::index_file`] / [`Processor::delete_file`] call reads
//! whatever it needs from the repository and writes back a fully-formed
//! result, leaving retry/backoff decisions to the worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use knowdisk_core::capability::{Clock, Embedder, Parser, VectorStore};
use knowdisk_core::error::Result;
use knowdisk_core::model::{ChunkRow, FileRow, FileStatus, VectorRow, file_id_for_path};
use knowdisk_db::{ChunkRecord, ProjectDb};
use knowdisk_index::{Chunker, ChunkerConfig};
use tracing::{debug, instrument};

/// Result of an [`Processor::index_file`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutcome {
  pub skipped: bool,
  pub indexed_chunks: usize,
}

/// The file-index processor: consumes a [`ProjectDb`] repository handle, a
/// [`VectorStore`], an [`Embedder`], and (per call) a resolved [`Parser`].
pub struct Processor {
  db: Arc<ProjectDb>,
  vectors: Arc<dyn VectorStore>,
  embedder: Arc<dyn Embedder>,
  chunker: Chunker,
  clock: Arc<dyn Clock>,
}

impl Processor {
  pub fn new(db: Arc<ProjectDb>, vectors: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, chunker_config: ChunkerConfig, clock: Arc<dyn Clock>) -> Self {
    Self { db, vectors, embedder, chunker: Chunker::new(chunker_config), clock }
  }

  /// Stream `path` through `parser`, diff the resulting spans against what
  /// is already stored, and perform the minimal update implied by the diff.
  #[instrument(level = "debug", skip(self, parser), fields(path = %path))]
  pub async fn index_file(&self, path: &str, parser: &dyn Parser) -> Result<IndexOutcome> {
    let metadata = tokio::fs::metadata(path).await?;
    let size = metadata.len();
    let mtime_ms = mtime_ms(&metadata);

    let existing = self.db.get_file_by_path(path).await?;
    if let Some(row) = &existing
      && row.matches_disk_state(size, mtime_ms)
    {
      debug!(path = %path, "fast-skip: disk state matches stored row");
      return Ok(IndexOutcome { skipped: true, indexed_chunks: 0 });
    }

    let now = self.clock.now_ms();
    let file_id = existing.as_ref().map(|r| r.file_id.clone()).unwrap_or_else(|| file_id_for_path(path));

    let mut file_row = existing.clone().unwrap_or_else(|| FileRow::new(path, size, mtime_ms, now));
    file_row.file_id = file_id.clone();
    file_row.size = size;
    file_row.mtime_ms = mtime_ms;
    file_row.status = FileStatus::Indexing;
    file_row.last_error = None;
    file_row.updated_at_ms = now;
    self.db.upsert_file(&file_row).await?;

    let bytes = tokio::fs::read(path).await?;
    let segments = parser.parse_stream(&bytes).await?;

    let mut new_spans = Vec::new();
    for segment in &segments {
      if segment.skipped.is_some() || segment.text.trim().is_empty() {
        continue;
      }
      new_spans.extend(self.chunker.chunk(&segment.text, segment.start_offset));
    }

    let previous = self.db.list_chunks_by_file_id(&file_id).await?;
    let mut previous_by_key: HashMap<(i64, i64), ChunkRecord> = previous.into_iter().map(|r| (r.row.offset_key(), r)).collect();

    // `is_new[i]` tracks whether `new_spans[i]` has no matching offset key in
    // the file's prior chunks; a `changed` span (same key, different hash)
    // or a `removed` prior span (no matching new key) both mark the whole
    // file structurally changed, per the diff the processor runs.
    let mut is_new = Vec::with_capacity(new_spans.len());
    let mut has_structural_change = false;
    let mut matched_keys = std::collections::HashSet::new();
    for span in &new_spans {
      let key = (span.start_offset, span.end_offset);
      match previous_by_key.get(&key) {
        None => is_new.push(true),
        Some(prior) if prior.row.chunk_hash == span.chunk_hash => {
          is_new.push(false);
          matched_keys.insert(key);
        }
        Some(_) => {
          has_structural_change = true;
          is_new.push(false);
          matched_keys.insert(key);
        }
      }
    }
    if previous_by_key.keys().any(|key| !matched_keys.contains(key)) {
      has_structural_change = true;
    }

    let vector_rows_written = if has_structural_change {
      // Whole-file replacement: every previous chunk for this file is
      // invalidated regardless of whether its own span survived unchanged,
      // since the spec's diff marks the *file* structurally changed, not
      // individual spans. Re-embed every span and rebuild from scratch.
      self.vectors.delete_by_source_path(path).await?;
      self.db.delete_chunks_by_file_id(&file_id).await?;
      self.db.remove_fts_chunks_by_file_id(&file_id).await;

      let mut chunk_records = Vec::with_capacity(new_spans.len());
      let mut vector_rows = Vec::with_capacity(new_spans.len());
      for span in &new_spans {
        let vector = self.embedder.embed(&span.text).await?;
        let chunk_row = ChunkRow::new(&file_id, path, Some(span.start_offset), Some(span.end_offset), &span.chunk_hash, Some(span.token_count), now);
        vector_rows.push(VectorRow::new(chunk_row.chunk_id.clone(), vector, path, &span.text, Some(span.start_offset), Some(span.end_offset), Some(span.token_count), now));
        chunk_records.push(ChunkRecord { row: chunk_row, title: path.to_string(), text: span.text.clone() });
      }
      if !vector_rows.is_empty() {
        self.vectors.upsert(vector_rows).await?;
      }
      if !chunk_records.is_empty() {
        self.db.upsert_fts_chunks(&chunk_records).await?;
      }
      chunk_records.len()
    } else {
      // Content-stable update: only spans at brand-new offset keys need
      // embedding; everything else (unchanged spans) is left untouched.
      let mut chunk_records = Vec::new();
      let mut vector_rows = Vec::new();
      for (span, new) in new_spans.iter().zip(is_new.iter()) {
        if *new {
          let vector = self.embedder.embed(&span.text).await?;
          let chunk_row = ChunkRow::new(&file_id, path, Some(span.start_offset), Some(span.end_offset), &span.chunk_hash, Some(span.token_count), now);
          vector_rows.push(VectorRow::new(chunk_row.chunk_id.clone(), vector, path, &span.text, Some(span.start_offset), Some(span.end_offset), Some(span.token_count), now));
          chunk_records.push(ChunkRecord { row: chunk_row, title: path.to_string(), text: span.text.clone() });
        }
      }
      if !vector_rows.is_empty() {
        self.vectors.upsert(vector_rows).await?;
      }
      if !chunk_records.is_empty() {
        self.db.upsert_fts_chunks(&chunk_records).await?;
      }
      chunk_records.len()
    };

    file_row.status = FileStatus::Indexed;
    file_row.last_index_time_ms = Some(now);
    file_row.updated_at_ms = now;
    self.db.upsert_file(&file_row).await?;

    Ok(IndexOutcome { skipped: false, indexed_chunks: vector_rows_written })
  }

  /// Remove a file and everything derived from it. A no-op if the file is
  /// not known to the repository.
  #[instrument(level = "debug", skip(self), fields(path = %path))]
  pub async fn delete_file(&self, path: &str) -> Result<()> {
    let Some(mut row) = self.db.get_file_by_path(path).await? else {
      return Ok(());
    };
    self.vectors.delete_by_source_path(path).await?;
    self.db.delete_chunks_by_file_id(&row.file_id).await?;
    self.db.remove_fts_chunks_by_file_id(&row.file_id).await;

    row.status = FileStatus::Deleted;
    row.last_error = None;
    row.updated_at_ms = self.clock.now_ms();
    self.db.upsert_file(&row).await?;
    Ok(())
  }

  /// Mark a file row `failed` with the given error, used by the worker pool
  /// once a job's retry budget is exhausted.
  pub async fn mark_file_failed(&self, path: &str, error: &str) -> Result<()> {
    let Some(mut row) = self.db.get_file_by_path(path).await? else {
      return Ok(());
    };
    row.status = FileStatus::Failed;
    row.last_error = Some(error.to_string());
    row.updated_at_ms = self.clock.now_ms();
    self.db.upsert_file(&row).await?;
    Ok(())
  }
}

fn mtime_ms(metadata: &std::fs::Metadata) -> i64 {
  metadata
    .modified()
    .ok()
    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
    .map(|d| d.as_millis() as i64)
    .unwrap_or(0)
}
