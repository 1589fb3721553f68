//! `chunks` table operations. Each row carries both the structural
//! [`ChunkRow`] fields and the `title`/`text` used by the in-process lexical
//! index in [`crate::fts`] — the two are always written and read together
//! since they share the same lifetime.

use std::sync::Arc;

use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use knowdisk_core::model::ChunkRow;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, trace};

use crate::connection::{DbError, ProjectDb, Result};
use crate::schema::chunks_schema;

/// A chunk row together with the title/text used for lexical search.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
  pub row: ChunkRow,
  pub title: String,
  pub text: String,
}

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

impl ProjectDb {
  /// Batch insert. Callers are expected to have already deleted any chunk
  /// ids superseded by this write via [`ProjectDb::delete_chunks_by_ids`].
  #[tracing::instrument(level = "trace", skip(self, records), fields(batch_size = records.len()))]
  pub async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    let table = self.chunks_table().await?;
    let batch = chunk_records_to_batch(records)?;
    let iter = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema());
    table.add(Box::new(iter)).execute().await?;
    trace!(table = "chunks", operation = "upsert_batch", count = records.len(), "upserted chunks");
    Ok(())
  }

  /// Ordered by `(startOffset ASC, chunkId ASC)`, deterministic for testing
  /// and for the diff the processor runs against the new spans.
  pub async fn list_chunks_by_file_id(&self, file_id: &str) -> Result<Vec<ChunkRecord>> {
    let table = self.chunks_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("file_id = '{}'", escape(file_id)))
      .execute()
      .await?
      .try_collect()
      .await?;

    let mut rows = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        rows.push(batch_to_chunk_record(batch, i)?);
      }
    }
    rows.sort_by(|a, b| (a.row.start_offset.unwrap_or(-1), &a.row.chunk_id).cmp(&(b.row.start_offset.unwrap_or(-1), &b.row.chunk_id)));
    Ok(rows)
  }

  pub async fn get_chunk_by_id(&self, chunk_id: &str) -> Result<Option<ChunkRecord>> {
    let table = self.chunks_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("chunk_id = '{}'", escape(chunk_id)))
      .execute()
      .await?
      .try_collect()
      .await?;

    for batch in &results {
      if batch.num_rows() > 0 {
        return Ok(Some(batch_to_chunk_record(batch, 0)?));
      }
    }
    Ok(None)
  }

  pub async fn delete_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<()> {
    if chunk_ids.is_empty() {
      return Ok(());
    }
    let table = self.chunks_table().await?;
    let quoted: Vec<String> = chunk_ids.iter().map(|id| format!("'{}'", escape(id))).collect();
    table.delete(&format!("chunk_id IN ({})", quoted.join(", "))).await?;
    Ok(())
  }

  pub async fn delete_chunks_by_file_id(&self, file_id: &str) -> Result<()> {
    debug!(table = "chunks", operation = "delete_for_file", file_id = %file_id, "deleting chunks for file");
    let table = self.chunks_table().await?;
    table.delete(&format!("file_id = '{}'", escape(file_id))).await?;
    Ok(())
  }

  /// Every chunk in the project, used to rebuild the lexical index on open.
  pub async fn list_all_chunks(&self) -> Result<Vec<ChunkRecord>> {
    let table = self.chunks_table().await?;
    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;
    let mut rows = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        rows.push(batch_to_chunk_record(batch, i)?);
      }
    }
    Ok(rows)
  }

  pub async fn clear_chunks(&self) -> Result<()> {
    let table = self.chunks_table().await?;
    table.delete("true").await?;
    Ok(())
  }
}

fn chunk_records_to_batch(records: &[ChunkRecord]) -> Result<RecordBatch> {
  let chunk_ids: Vec<&str> = records.iter().map(|r| r.row.chunk_id.as_str()).collect();
  let file_ids: Vec<&str> = records.iter().map(|r| r.row.file_id.as_str()).collect();
  let source_paths: Vec<&str> = records.iter().map(|r| r.row.source_path.as_str()).collect();
  let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
  let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
  let start_offsets: Vec<Option<i64>> = records.iter().map(|r| r.row.start_offset).collect();
  let end_offsets: Vec<Option<i64>> = records.iter().map(|r| r.row.end_offset).collect();
  let chunk_hashes: Vec<&str> = records.iter().map(|r| r.row.chunk_hash.as_str()).collect();
  let token_counts: Vec<Option<i64>> = records.iter().map(|r| r.row.token_count).collect();
  let updated_ats: Vec<i64> = records.iter().map(|r| r.row.updated_at_ms).collect();

  let batch = RecordBatch::try_new(
    chunks_schema(),
    vec![
      Arc::new(StringArray::from(chunk_ids)),
      Arc::new(StringArray::from(file_ids)),
      Arc::new(StringArray::from(source_paths)),
      Arc::new(StringArray::from(titles)),
      Arc::new(StringArray::from(texts)),
      Arc::new(Int64Array::from(start_offsets)),
      Arc::new(Int64Array::from(end_offsets)),
      Arc::new(StringArray::from(chunk_hashes)),
      Arc::new(Int64Array::from(token_counts)),
      Arc::new(Int64Array::from(updated_ats)),
    ],
  )?;
  Ok(batch)
}

fn batch_to_chunk_record(batch: &RecordBatch, i: usize) -> Result<ChunkRecord> {
  let get_str = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(i).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };
  let get_i64_opt = |name: &str| -> Option<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .filter(|a| !a.is_null(i))
      .map(|a| a.value(i))
  };
  let get_i64 = |name: &str| -> Result<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .map(|a| a.value(i))
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };

  Ok(ChunkRecord {
    row: ChunkRow {
      chunk_id: get_str("chunk_id")?,
      file_id: get_str("file_id")?,
      source_path: get_str("source_path")?,
      start_offset: get_i64_opt("start_offset"),
      end_offset: get_i64_opt("end_offset"),
      chunk_hash: get_str("chunk_hash")?,
      token_count: get_i64_opt("token_count"),
      updated_at_ms: get_i64("updated_at_ms")?,
    },
    title: get_str("title")?,
    text: get_str("text")?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use knowdisk_core::ProjectId;
  use std::path::Path;
  use tempfile::TempDir;

  async fn test_db() -> (TempDir, ProjectDb) {
    let temp = TempDir::new().unwrap();
    let project_id = ProjectId::from_path(Path::new("/test"));
    let db = ProjectDb::open_at_path(project_id, temp.path().join("t.lancedb"), 8).await.unwrap();
    (temp, db)
  }

  fn record(file_id: &str, source_path: &str, start: i64, end: i64, text: &str) -> ChunkRecord {
    let hash = knowdisk_core::model::chunk_hash(text);
    ChunkRecord {
      row: ChunkRow::new(file_id, source_path, Some(start), Some(end), hash, Some(4), 1),
      title: source_path.to_string(),
      text: text.to_string(),
    }
  }

  #[tokio::test]
  async fn upsert_then_list_by_file_id_round_trips() {
    let (_tmp, db) = test_db().await;
    let rec = record("f1", "/a.rs", 0, 5, "hello");
    db.upsert_chunks(&[rec.clone()]).await.unwrap();

    let listed = db.list_chunks_by_file_id("f1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].text, "hello");
  }

  #[tokio::test]
  async fn delete_chunks_by_ids_removes_only_named_rows() {
    let (_tmp, db) = test_db().await;
    let a = record("f1", "/a.rs", 0, 5, "hello");
    let b = record("f1", "/a.rs", 5, 10, "world");
    db.upsert_chunks(&[a.clone(), b.clone()]).await.unwrap();

    db.delete_chunks_by_ids(&[a.row.chunk_id.clone()]).await.unwrap();

    let remaining = db.list_chunks_by_file_id("f1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].row.chunk_id, b.row.chunk_id);
  }

  #[tokio::test]
  async fn delete_chunks_by_file_id_removes_all_chunks_for_file() {
    let (_tmp, db) = test_db().await;
    let a = record("f1", "/a.rs", 0, 5, "hello");
    let b = record("f2", "/b.rs", 0, 5, "world");
    db.upsert_chunks(&[a, b]).await.unwrap();

    db.delete_chunks_by_file_id("f1").await.unwrap();

    assert!(db.list_chunks_by_file_id("f1").await.unwrap().is_empty());
    assert_eq!(db.list_chunks_by_file_id("f2").await.unwrap().len(), 1);
  }
}
