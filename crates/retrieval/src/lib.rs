//! Hybrid retrieval pipeline: dense vector search plus a lexical full-text
//! search, deduplicated by chunk identity and optionally reranked.
//!
//! Grounded in the dispatch shape of a hybrid BM25+vector searcher (parallel
//! lookup, optional reranker stage) but narrowed to the merge-by-`chunkId`
//! algorithm this crate actually needs: no RRF fusion, no snippet search, no
//! per-file result capping.

use std::collections::HashMap;
use std::sync::Arc;

use knowdisk_core::capability::{Embedder, Reranker, SourceReader, VectorStore};
use knowdisk_core::config::RetrievalConfig;
use knowdisk_core::error::{Error, Result};
use knowdisk_core::model::{ChunkRow, RetrievalResult, VectorRowMetadata, VectorSearchRow, file_id_for_path};
use knowdisk_db::ProjectDb;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
  #[error("query must not be empty")]
  EmptyQuery,
}

impl From<RetrievalError> for Error {
  fn from(err: RetrievalError) -> Self {
    Error::Validation(err.to_string())
  }
}

/// Options accepted by [`RetrievalPipeline::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
  pub top_k: Option<usize>,
  pub title_only: bool,
}

/// `1 / (1 + |bm25|)`: maps the lexical index's signed, unbounded BM25 score
/// into the same higher-is-better range vector scores live in.
fn normalize_fts_score(bm25: f32) -> f32 {
  1.0 / (1.0 + bm25.abs())
}

fn sort_by_score_desc(rows: &mut [RetrievalResult]) {
  rows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
}

/// Wires together the capabilities the pipeline needs: an embedder and an
/// (optional) reranker injected by the composition root, a vector store, and
/// the project's repository for lexical search and chunk metadata. No field
/// here is owned by this crate — all are externally supplied.
pub struct RetrievalPipeline {
  embedder: Arc<dyn Embedder>,
  vector_store: Arc<dyn VectorStore>,
  db: Arc<ProjectDb>,
  reranker: Option<Arc<dyn Reranker>>,
  source_reader: Option<Arc<dyn SourceReader>>,
  config: RetrievalConfig,
}

impl RetrievalPipeline {
  pub fn new(embedder: Arc<dyn Embedder>, vector_store: Arc<dyn VectorStore>, db: Arc<ProjectDb>, config: RetrievalConfig) -> Self {
    Self { embedder, vector_store, db, reranker: None, source_reader: None, config }
  }

  pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
    self.reranker = Some(reranker);
    self
  }

  pub fn with_source_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
    self.source_reader = Some(reader);
    self
  }

  /// `search(query, opts)`; see module docs for the merge algorithm.
  #[tracing::instrument(level = "debug", skip(self), fields(title_only = opts.title_only))]
  pub async fn search(&self, query: &str, opts: SearchOptions) -> Result<Vec<RetrievalResult>> {
    if query.is_empty() {
      return Err(RetrievalError::EmptyQuery.into());
    }
    let mut top_k = opts.top_k.unwrap_or(self.config.default_top_k);
    if self.reranker.is_some() {
      top_k = top_k.min(self.config.rerank_top_n);
    }

    if opts.title_only {
      return self.search_title_only(query, top_k).await;
    }

    let (vector_rows, fts_rows) = tokio::try_join!(self.search_vector(query), self.search_fts(query))?;

    let mut merged = merge_by_chunk_id(vector_rows, fts_rows);

    if let Some(reranker) = &self.reranker {
      merged = reranker.rerank(query, merged, top_k).await?;
    } else {
      merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    }
    merged.truncate(top_k);

    Ok(merged.into_iter().map(vector_row_to_result).collect())
  }

  async fn search_title_only(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
    let rows = self.db.search_title_fts(query, self.config.fts_top_n).await;
    let mut results: Vec<RetrievalResult> = rows
      .into_iter()
      .map(|row| RetrievalResult {
        chunk_id: row.source_path.clone(),
        source_path: row.source_path.clone(),
        chunk_text: row.source_path,
        score: normalize_fts_score(row.bm25),
      })
      .collect();
    sort_by_score_desc(&mut results);
    results.truncate(top_k);
    Ok(results)
  }

  async fn search_vector(&self, query: &str) -> Result<Vec<VectorSearchRow>> {
    let query_vector = self.embedder.embed(query).await?;
    self.vector_store.search(&query_vector, self.config.vector_top_k).await
  }

  async fn search_fts(&self, query: &str) -> Result<Vec<VectorSearchRow>> {
    let rows = self.db.search_fts(query, self.config.fts_top_n).await;
    Ok(
      rows
        .into_iter()
        .map(|row| VectorSearchRow {
          chunk_id: row.chunk_id,
          score: normalize_fts_score(row.bm25),
          metadata: VectorRowMetadata {
            source_path: row.source_path,
            title: Some(row.title),
            chunk_text: row.text,
            start_offset: None,
            end_offset: None,
            token_estimate: None,
            updated_at: 0,
          },
        })
        .collect(),
    )
  }

  /// `retrieveBySourcePath(path)`: every vector row for the path, with the
  /// stored preview hydrated into full text when a [`SourceReader`] is
  /// configured and the row carries both offsets.
  pub async fn retrieve_by_source_path(&self, path: &str) -> Result<Vec<RetrievalResult>> {
    let rows = self.vector_store.list_by_source_path(path).await?;
    Ok(
      rows
        .into_iter()
        .map(|row| {
          let mut text = row.metadata.chunk_text.clone();
          if let (Some(reader), Some(start), Some(end)) = (&self.source_reader, row.metadata.start_offset, row.metadata.end_offset) {
            if let Some(full) = reader.read_range(path, start, end) {
              text = full;
            }
          }
          RetrievalResult { chunk_id: row.chunk_id, source_path: row.metadata.source_path, chunk_text: text, score: row.score }
        })
        .collect(),
    )
  }

  /// `getSourceChunkInfoByPath(path)`: raw chunk rows ordered by
  /// `(startOffset, chunkId)`, used to enumerate metadata without loading
  /// text. File identity is content-addressed from the path, so no lookup
  /// round-trip through the `files` table is needed.
  pub async fn get_source_chunk_info_by_path(&self, path: &str) -> Result<Vec<ChunkRow>> {
    let file_id = file_id_for_path(path);
    let records = self.db.list_chunks_by_file_id(&file_id).await.map_err(|e| Error::Storage(e.to_string()))?;
    Ok(records.into_iter().map(|r| r.row).collect())
  }
}

/// Merge vector and FTS rows by `chunkId`. Vector rows win conflicts;
/// FTS-only rows are materialized as synthetic rows with an empty vector.
fn merge_by_chunk_id(vector_rows: Vec<VectorSearchRow>, fts_rows: Vec<VectorSearchRow>) -> Vec<VectorSearchRow> {
  let mut merged: HashMap<String, VectorSearchRow> = HashMap::new();
  for row in fts_rows {
    merged.insert(row.chunk_id.clone(), row);
  }
  for row in vector_rows {
    merged.insert(row.chunk_id.clone(), row);
  }
  merged.into_values().collect()
}

fn vector_row_to_result(row: VectorSearchRow) -> RetrievalResult {
  RetrievalResult { chunk_id: row.chunk_id, source_path: row.metadata.source_path, chunk_text: row.metadata.chunk_text, score: row.score }
}
