//! `tombstones` table operations: durable record of source removals
//! requested while the process may not be running, so a deferred delete
//! still happens after a crash-restart.

use std::sync::Arc;

use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use knowdisk_core::model::SourceTombstone;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::connection::{DbError, ProjectDb, Result};
use crate::schema::tombstones_schema;

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

impl ProjectDb {
  pub async fn add_source_tombstone(&self, tombstone: &SourceTombstone) -> Result<()> {
    let table = self.tombstones_table().await?;
    table.delete(&format!("path = '{}'", escape(&tombstone.path))).await?;

    let batch = RecordBatch::try_new(
      tombstones_schema(),
      vec![
        Arc::new(StringArray::from(vec![tombstone.path.as_str()])),
        Arc::new(Int64Array::from(vec![tombstone.deleted_time_ms])),
      ],
    )?;
    let iter = RecordBatchIterator::new(vec![Ok(batch)], tombstones_schema());
    table.add(Box::new(iter)).execute().await?;
    Ok(())
  }

  pub async fn remove_source_tombstone(&self, path: &str) -> Result<()> {
    let table = self.tombstones_table().await?;
    table.delete(&format!("path = '{}'", escape(path))).await?;
    Ok(())
  }

  pub async fn list_source_tombstones(&self) -> Result<Vec<SourceTombstone>> {
    let table = self.tombstones_table().await?;
    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;
    let mut rows = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        rows.push(batch_to_tombstone(batch, i)?);
      }
    }
    Ok(rows)
  }

  /// Whether `path` falls under any active tombstone, by exact match or
  /// directory-prefix containment.
  pub async fn is_under_tombstone(&self, path: &str) -> Result<bool> {
    let tombstones = self.list_source_tombstones().await?;
    Ok(tombstones.iter().any(|t| path == t.path || path.starts_with(&format!("{}/", t.path))))
  }

  pub async fn clear_tombstones(&self) -> Result<()> {
    let table = self.tombstones_table().await?;
    table.delete("true").await?;
    Ok(())
  }
}

fn batch_to_tombstone(batch: &RecordBatch, i: usize) -> Result<SourceTombstone> {
  let path = batch
    .column_by_name("path")
    .and_then(|c| c.as_any().downcast_ref::<StringArray>())
    .map(|a| a.value(i).to_string())
    .ok_or_else(|| DbError::NotFound("column path".to_string()))?;
  let deleted_time_ms = batch
    .column_by_name("deleted_time_ms")
    .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
    .map(|a| a.value(i))
    .ok_or_else(|| DbError::NotFound("column deleted_time_ms".to_string()))?;
  Ok(SourceTombstone { path, deleted_time_ms })
}
