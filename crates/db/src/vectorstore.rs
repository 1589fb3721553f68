//! `vectors` table operations and the [`knowdisk_core::VectorStore`]
//! adapter over it. Kept as its own implementation rather than methods on
//! `ProjectDb` directly, because `VectorStore` is an externally-injected
//! capability — `LanceVectorStore` happens to be backed by the same lancedb
//! connection, but the core crate never imports this module.

use std::sync::Arc;

use arrow_array::{Float32Array, FixedSizeListArray, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use knowdisk_core::capability::VectorStore;
use knowdisk_core::error::{Error, Result as CoreResult};
use knowdisk_core::model::{VectorRow, VectorRowMetadata, VectorSearchRow};
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::connection::{DbError, ProjectDb};
use crate::schema::vectors_schema;

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

/// A `VectorStore` backed by the project's `vectors` lancedb table.
pub struct LanceVectorStore {
  db: Arc<ProjectDb>,
}

impl LanceVectorStore {
  pub fn new(db: Arc<ProjectDb>) -> Self {
    Self { db }
  }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
  async fn upsert(&self, rows: Vec<VectorRow>) -> CoreResult<()> {
    if rows.is_empty() {
      return Ok(());
    }
    let table = self.db.vectors_table().await.map_err(to_core_err)?;

    let ids: Vec<String> = rows.iter().map(|r| r.chunk_id.clone()).collect();
    let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", escape(id))).collect();
    table
      .delete(&format!("chunk_id IN ({})", quoted.join(", ")))
      .await
      .map_err(|e| Error::VectorStore(e.to_string()))?;

    let batch = vector_rows_to_batch(&rows, self.db.vector_dim).map_err(to_core_err)?;
    let iter = RecordBatchIterator::new(vec![Ok(batch)], vectors_schema(self.db.vector_dim));
    table.add(Box::new(iter)).execute().await.map_err(|e| Error::VectorStore(e.to_string()))?;
    Ok(())
  }

  async fn search(&self, vector: &[f32], top_k: usize) -> CoreResult<Vec<VectorSearchRow>> {
    let table = self.db.vectors_table().await.map_err(to_core_err)?;
    let query = table
      .vector_search(vector.to_vec())
      .map_err(|e| Error::VectorStore(e.to_string()))?
      .distance_type(DistanceType::Cosine)
      .limit(top_k);
    let results: Vec<RecordBatch> = query
      .execute()
      .await
      .map_err(|e| Error::VectorStore(e.to_string()))?
      .try_collect()
      .await
      .map_err(|e| Error::VectorStore(e.to_string()))?;

    let mut rows = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        let distance = batch
          .column_by_name("_distance")
          .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
          .map(|a| a.value(i))
          .unwrap_or(0.0);
        // cosine distance = 1 - cosine similarity; flip to a higher-is-better score.
        let score = 1.0 - distance;
        rows.push(batch_to_search_row(batch, i, score).map_err(to_core_err)?);
      }
    }
    Ok(rows)
  }

  async fn list_by_source_path(&self, path: &str) -> CoreResult<Vec<VectorSearchRow>> {
    let table = self.db.vectors_table().await.map_err(to_core_err)?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("source_path = '{}'", escape(path)))
      .execute()
      .await
      .map_err(|e| Error::VectorStore(e.to_string()))?
      .try_collect()
      .await
      .map_err(|e| Error::VectorStore(e.to_string()))?;

    let mut rows = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        rows.push(batch_to_search_row(batch, i, 0.0).map_err(to_core_err)?);
      }
    }
    Ok(rows)
  }

  async fn delete_by_source_path(&self, path: &str) -> CoreResult<()> {
    let table = self.db.vectors_table().await.map_err(to_core_err)?;
    table
      .delete(&format!("source_path = '{}'", escape(path)))
      .await
      .map_err(|e| Error::VectorStore(e.to_string()))?;
    Ok(())
  }

  async fn destroy(&self) -> CoreResult<()> {
    let table = self.db.vectors_table().await.map_err(to_core_err)?;
    table.delete("true").await.map_err(|e| Error::VectorStore(e.to_string()))?;
    Ok(())
  }
}

fn to_core_err(err: DbError) -> Error {
  Error::VectorStore(err.to_string())
}

fn vector_rows_to_batch(rows: &[VectorRow], vector_dim: usize) -> crate::connection::Result<RecordBatch> {
  let chunk_ids: Vec<&str> = rows.iter().map(|r| r.chunk_id.as_str()).collect();
  let source_paths: Vec<&str> = rows.iter().map(|r| r.metadata.source_path.as_str()).collect();
  let titles: Vec<Option<&str>> = rows.iter().map(|r| r.metadata.title.as_deref()).collect();
  let chunk_texts: Vec<&str> = rows.iter().map(|r| r.metadata.chunk_text.as_str()).collect();
  let start_offsets: Vec<Option<i64>> = rows.iter().map(|r| r.metadata.start_offset).collect();
  let end_offsets: Vec<Option<i64>> = rows.iter().map(|r| r.metadata.end_offset).collect();
  let token_estimates: Vec<Option<i64>> = rows.iter().map(|r| r.metadata.token_estimate).collect();
  let updated_ats: Vec<i64> = rows.iter().map(|r| r.metadata.updated_at).collect();

  let mut flat_vectors: Vec<f32> = Vec::with_capacity(rows.len() * vector_dim);
  for row in rows {
    let mut v = row.vector.clone();
    v.resize(vector_dim, 0.0);
    flat_vectors.extend(v);
  }
  let vector_values = Float32Array::from(flat_vectors);
  let field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(vector_values), None)?;

  let batch = RecordBatch::try_new(
    vectors_schema(vector_dim),
    vec![
      Arc::new(StringArray::from(chunk_ids)),
      Arc::new(StringArray::from(source_paths)),
      Arc::new(StringArray::from(titles)),
      Arc::new(StringArray::from(chunk_texts)),
      Arc::new(Int64Array::from(start_offsets)),
      Arc::new(Int64Array::from(end_offsets)),
      Arc::new(Int64Array::from(token_estimates)),
      Arc::new(Int64Array::from(updated_ats)),
      Arc::new(vector_list),
    ],
  )?;
  Ok(batch)
}

fn batch_to_search_row(batch: &RecordBatch, i: usize, score: f32) -> crate::connection::Result<VectorSearchRow> {
  let get_str = |name: &str| -> crate::connection::Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(i).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };
  let get_str_opt = |name: &str| -> Option<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .filter(|a| !a.is_null(i))
      .map(|a| a.value(i).to_string())
  };
  let get_i64_opt = |name: &str| -> Option<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .filter(|a| !a.is_null(i))
      .map(|a| a.value(i))
  };
  let get_i64 = |name: &str| -> crate::connection::Result<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .map(|a| a.value(i))
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };

  Ok(VectorSearchRow {
    chunk_id: get_str("chunk_id")?,
    score,
    metadata: VectorRowMetadata {
      source_path: get_str("source_path")?,
      title: get_str_opt("title"),
      chunk_text: get_str("chunk_text")?,
      start_offset: get_i64_opt("start_offset"),
      end_offset: get_i64_opt("end_offset"),
      token_estimate: get_i64_opt("token_estimate"),
      updated_at: get_i64("updated_at")?,
    },
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use knowdisk_core::ProjectId;
  use std::path::Path;
  use tempfile::TempDir;

  async fn test_store() -> (TempDir, LanceVectorStore) {
    let temp = TempDir::new().unwrap();
    let project_id = ProjectId::from_path(Path::new("/test"));
    let db = ProjectDb::open_at_path(project_id, temp.path().join("t.lancedb"), 4).await.unwrap();
    (temp, LanceVectorStore::new(Arc::new(db)))
  }

  fn row(chunk_id: &str, path: &str, vector: Vec<f32>) -> VectorRow {
    VectorRow::new(chunk_id, vector, path, "hello world", Some(0), Some(5), Some(2), 1)
  }

  #[tokio::test]
  async fn upsert_then_search_returns_nearest_by_cosine() {
    let (_tmp, store) = test_store().await;
    store
      .upsert(vec![
        row("c1", "/a.rs", vec![1.0, 0.0, 0.0, 0.0]),
        row("c2", "/b.rs", vec![0.0, 1.0, 0.0, 0.0]),
      ])
      .await
      .unwrap();

    let results = store.search(&[1.0, 0.0, 0.0, 0.0], 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, "c1");
  }

  #[tokio::test]
  async fn upsert_is_replace_by_chunk_id() {
    let (_tmp, store) = test_store().await;
    store.upsert(vec![row("c1", "/a.rs", vec![1.0, 0.0, 0.0, 0.0])]).await.unwrap();
    store.upsert(vec![row("c1", "/a.rs", vec![0.0, 1.0, 0.0, 0.0])]).await.unwrap();

    let rows = store.list_by_source_path("/a.rs").await.unwrap();
    assert_eq!(rows.len(), 1);
  }

  #[tokio::test]
  async fn delete_by_source_path_removes_all_its_rows() {
    let (_tmp, store) = test_store().await;
    store
      .upsert(vec![
        row("c1", "/a.rs", vec![1.0, 0.0, 0.0, 0.0]),
        row("c2", "/a.rs", vec![0.0, 1.0, 0.0, 0.0]),
        row("c3", "/b.rs", vec![0.0, 0.0, 1.0, 0.0]),
      ])
      .await
      .unwrap();

    store.delete_by_source_path("/a.rs").await.unwrap();

    assert!(store.list_by_source_path("/a.rs").await.unwrap().is_empty());
    assert_eq!(store.list_by_source_path("/b.rs").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn destroy_clears_every_row() {
    let (_tmp, store) = test_store().await;
    store.upsert(vec![row("c1", "/a.rs", vec![1.0, 0.0, 0.0, 0.0])]).await.unwrap();
    store.destroy().await.unwrap();
    assert!(store.list_by_source_path("/a.rs").await.unwrap().is_empty());
  }
}
