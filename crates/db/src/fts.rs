//! In-process lexical search over chunk text and titles.
//!
//! lancedb's native full-text index is not used here: nothing in the corpus
//! this repository is modeled on calls it, so rather than guess at an
//! unverified API surface this builds a small inverted index directly,
//! following the same "lazy-loaded index wrapping durable storage" shape as
//! a custom BM25 searcher, with unicode-aware tokenization from
//! `unicode-segmentation`. The index is rebuilt from the `chunks` table on
//! [`ProjectDb::open_at_path`] and kept in sync incrementally afterwards, so
//! restarts never see stale postings.

use std::collections::HashMap;
use std::sync::Arc;

use knowdisk_core::model::FtsSearchRow;
use tokio::sync::RwLock;
use unicode_segmentation::UnicodeSegmentation;

use crate::connection::{ProjectDb, Result};

const K1: f32 = 1.2;
const B: f32 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
  text.unicode_words().map(|w| w.to_lowercase()).collect()
}

#[derive(Debug, Clone)]
struct Document {
  file_id: String,
  source_path: String,
  title: String,
  body: String,
  body_len: usize,
}

/// Inverted index over one field (`body` or `title`) of every chunk, scored
/// with the standard higher-is-better BM25 formula. `bm25_ascending` negates
/// the score on the way out so ascending sort order yields the most relevant
/// row first, matching the `FtsSearchRow.bm25` contract.
#[derive(Debug, Default)]
pub struct Bm25Index {
  documents: HashMap<String, Document>,
  /// term -> (chunk_id -> term frequency in that field)
  postings: HashMap<String, HashMap<String, u32>>,
  total_len: u64,
}

impl Bm25Index {
  pub fn new() -> Self {
    Self::default()
  }

  fn avg_len(&self) -> f32 {
    if self.documents.is_empty() {
      0.0
    } else {
      self.total_len as f32 / self.documents.len() as f32
    }
  }

  pub fn doc_count(&self) -> usize {
    self.documents.len()
  }

  pub fn upsert(&mut self, chunk_id: &str, file_id: &str, source_path: &str, title: &str, text_for_field: &str) {
    self.remove(chunk_id);

    let tokens = tokenize(text_for_field);
    let body_len = tokens.len();
    self.total_len += body_len as u64;

    let mut freqs: HashMap<String, u32> = HashMap::new();
    for term in tokens {
      *freqs.entry(term).or_insert(0) += 1;
    }
    for (term, freq) in &freqs {
      self.postings.entry(term.clone()).or_default().insert(chunk_id.to_string(), *freq);
    }

    self.documents.insert(
      chunk_id.to_string(),
      Document {
        file_id: file_id.to_string(),
        source_path: source_path.to_string(),
        title: title.to_string(),
        body: text_for_field.to_string(),
        body_len,
      },
    );
  }

  pub fn remove(&mut self, chunk_id: &str) {
    if let Some(doc) = self.documents.remove(chunk_id) {
      self.total_len = self.total_len.saturating_sub(doc.body_len as u64);
      for postings in self.postings.values_mut() {
        postings.remove(chunk_id);
      }
    }
  }

  pub fn remove_by_file_id(&mut self, file_id: &str) {
    let ids: Vec<String> = self
      .documents
      .iter()
      .filter(|(_, d)| d.file_id == file_id)
      .map(|(id, _)| id.clone())
      .collect();
    for id in ids {
      self.remove(&id);
    }
  }

  /// Ascending-BM25 rows (lower `bm25` is better), truncated to `limit`.
  pub fn search(&self, query: &str, limit: usize) -> Vec<FtsSearchRow> {
    let terms = tokenize(query);
    if terms.is_empty() || self.documents.is_empty() {
      return Vec::new();
    }

    let n = self.documents.len() as f32;
    let avg_len = self.avg_len().max(1.0);
    let mut scores: HashMap<String, f32> = HashMap::new();

    for term in &terms {
      let Some(postings) = self.postings.get(term) else {
        continue;
      };
      let df = postings.len() as f32;
      let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

      for (chunk_id, &tf) in postings {
        let doc = match self.documents.get(chunk_id) {
          Some(d) => d,
          None => continue,
        };
        let tf = tf as f32;
        let len_norm = 1.0 - B + B * (doc.body_len as f32 / avg_len);
        let term_score = idf * (tf * (K1 + 1.0)) / (tf + K1 * len_norm);
        *scores.entry(chunk_id.clone()).or_insert(0.0) += term_score;
      }
    }

    let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);

    ranked
      .into_iter()
      .map(|(chunk_id, relevance)| {
        let doc = &self.documents[&chunk_id];
        FtsSearchRow {
          chunk_id,
          source_path: doc.source_path.clone(),
          title: doc.title.clone(),
          text: doc.body.clone(),
          bm25: -relevance,
        }
      })
      .collect()
  }
}

/// Pair of indices kept in sync on every chunk mutation: one scored over the
/// chunk body, one over the title, so a title match can outrank a body match
/// in a later merge without either corpus polluting the other's statistics.
pub struct LexicalIndex {
  pub body: RwLock<Bm25Index>,
  pub title: RwLock<Bm25Index>,
}

impl LexicalIndex {
  pub fn empty() -> Arc<Self> {
    Arc::new(Self {
      body: RwLock::new(Bm25Index::new()),
      title: RwLock::new(Bm25Index::new()),
    })
  }
}

impl ProjectDb {
  /// Rebuild the in-memory lexical index from durable storage. Called once
  /// on open; "no stale tokens remain" is guaranteed by discarding whatever
  /// was in memory beforehand rather than trying to diff it.
  pub async fn rebuild_fts_index(&self) -> Result<()> {
    let records = self.list_all_chunks().await?;
    let mut body = Bm25Index::new();
    let mut title = Bm25Index::new();
    for record in &records {
      body.upsert(&record.row.chunk_id, &record.row.file_id, &record.row.source_path, &record.title, &record.text);
      title.upsert(&record.row.chunk_id, &record.row.file_id, &record.row.source_path, &record.title, &record.title);
    }
    *self.fts.body.write().await = body;
    *self.fts.title.write().await = title;
    Ok(())
  }

  /// Upsert chunk rows into durable storage and the in-memory lexical index
  /// together; the caller is responsible for having already deleted any
  /// chunk ids these supersede via [`ProjectDb::delete_chunks_by_ids`].
  pub async fn upsert_fts_chunks(&self, records: &[crate::chunks::ChunkRecord]) -> Result<()> {
    self.upsert_chunks(records).await?;
    let mut body = self.fts.body.write().await;
    let mut title = self.fts.title.write().await;
    for record in records {
      body.upsert(&record.row.chunk_id, &record.row.file_id, &record.row.source_path, &record.title, &record.text);
      title.upsert(&record.row.chunk_id, &record.row.file_id, &record.row.source_path, &record.title, &record.title);
    }
    Ok(())
  }

  pub async fn remove_fts_chunks(&self, chunk_ids: &[String]) {
    let mut body = self.fts.body.write().await;
    let mut title = self.fts.title.write().await;
    for id in chunk_ids {
      body.remove(id);
      title.remove(id);
    }
  }

  pub async fn remove_fts_chunks_by_file_id(&self, file_id: &str) {
    self.fts.body.write().await.remove_by_file_id(file_id);
    self.fts.title.write().await.remove_by_file_id(file_id);
  }

  pub async fn search_fts(&self, query: &str, top_n: usize) -> Vec<FtsSearchRow> {
    self.fts.body.read().await.search(query, top_n)
  }

  pub async fn search_title_fts(&self, query: &str, top_n: usize) -> Vec<FtsSearchRow> {
    self.fts.title.read().await.search(query, top_n)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ranks_higher_term_frequency_above_lower() {
    let mut index = Bm25Index::new();
    index.upsert("c1", "f1", "/a.md", "a", "rust rust rust async runtime");
    index.upsert("c2", "f1", "/b.md", "b", "rust is great");

    let results = index.search("rust", 10);
    assert_eq!(results[0].chunk_id, "c1");
    assert!(results[0].bm25 < results[1].bm25, "ascending: lower bm25 must rank first");
  }

  #[test]
  fn remove_drops_chunk_from_results() {
    let mut index = Bm25Index::new();
    index.upsert("c1", "f1", "/a.md", "a", "async runtime scheduler");
    index.remove("c1");
    assert!(index.search("async", 10).is_empty());
  }

  #[test]
  fn remove_by_file_id_drops_every_chunk_for_that_file() {
    let mut index = Bm25Index::new();
    index.upsert("c1", "f1", "/a.md", "a", "hello world");
    index.upsert("c2", "f1", "/a.md", "a", "hello again");
    index.upsert("c3", "f2", "/b.md", "b", "hello there");
    index.remove_by_file_id("f1");
    assert_eq!(index.search("hello", 10).len(), 1);
  }

  #[test]
  fn empty_query_returns_no_results() {
    let mut index = Bm25Index::new();
    index.upsert("c1", "f1", "/a.md", "a", "some text");
    assert!(index.search("   ", 10).is_empty());
  }

  #[test]
  fn upsert_replaces_previous_content_for_same_chunk_id() {
    let mut index = Bm25Index::new();
    index.upsert("c1", "f1", "/a.md", "a", "alpha");
    index.upsert("c1", "f1", "/a.md", "a", "beta");
    assert!(index.search("alpha", 10).is_empty());
    assert_eq!(index.search("beta", 10).len(), 1);
  }
}
