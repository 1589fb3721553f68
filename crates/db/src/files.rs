//! `files` table operations: the durable record of every path the indexer
//! has ever observed, with the disk-state snapshot used for fast-skip.

use std::sync::Arc;

use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use knowdisk_core::model::{FileRow, FileStatus};
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, trace};

use crate::connection::{DbError, ProjectDb, Result};
use crate::schema::files_schema;

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

impl ProjectDb {
  /// Replace-by-`path`; deletes any existing row for the path first so a
  /// single file never accumulates more than one row.
  #[tracing::instrument(level = "trace", skip(self, row), fields(path = %row.path))]
  pub async fn upsert_file(&self, row: &FileRow) -> Result<()> {
    let table = self.files_table().await?;
    table.delete(&format!("path = '{}'", escape(&row.path))).await?;

    let batch = file_row_to_batch(row)?;
    let iter = RecordBatchIterator::new(vec![Ok(batch)], files_schema());
    table.add(Box::new(iter)).execute().await?;
    trace!(table = "files", operation = "upsert", path = %row.path, "upserted file row");
    Ok(())
  }

  pub async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRow>> {
    let table = self.files_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("path = '{}'", escape(path)))
      .execute()
      .await?
      .try_collect()
      .await?;

    for batch in &results {
      if batch.num_rows() > 0 {
        return Ok(Some(batch_to_file_row(batch, 0)?));
      }
    }
    Ok(None)
  }

  pub async fn get_file_by_id(&self, file_id: &str) -> Result<Option<FileRow>> {
    let table = self.files_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("file_id = '{}'", escape(file_id)))
      .execute()
      .await?
      .try_collect()
      .await?;

    for batch in &results {
      if batch.num_rows() > 0 {
        return Ok(Some(batch_to_file_row(batch, 0)?));
      }
    }
    Ok(None)
  }

  /// All known files, optionally narrowed to a status.
  pub async fn list_files(&self, status: Option<FileStatus>) -> Result<Vec<FileRow>> {
    let table = self.files_table().await?;
    let query = match status {
      Some(s) => table.query().only_if(format!("status = '{}'", s.as_str())),
      None => table.query(),
    };
    let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

    let mut rows = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        rows.push(batch_to_file_row(batch, i)?);
      }
    }
    Ok(rows)
  }

  pub async fn delete_file_row(&self, path: &str) -> Result<()> {
    debug!(table = "files", operation = "delete", path = %path, "deleting file row");
    let table = self.files_table().await?;
    table.delete(&format!("path = '{}'", escape(path))).await?;
    Ok(())
  }

  /// Drop every row; used by "force resync".
  pub async fn clear_files(&self) -> Result<()> {
    let table = self.files_table().await?;
    table.delete("true").await?;
    Ok(())
  }
}

fn file_row_to_batch(row: &FileRow) -> Result<RecordBatch> {
  let batch = RecordBatch::try_new(
    files_schema(),
    vec![
      Arc::new(StringArray::from(vec![row.file_id.as_str()])),
      Arc::new(StringArray::from(vec![row.path.as_str()])),
      Arc::new(Int64Array::from(vec![row.size as i64])),
      Arc::new(Int64Array::from(vec![row.mtime_ms])),
      Arc::new(Int64Array::from(vec![row.inode.map(|v| v as i64)])),
      Arc::new(StringArray::from(vec![row.status.as_str()])),
      Arc::new(Int64Array::from(vec![row.last_index_time_ms])),
      Arc::new(StringArray::from(vec![row.last_error.as_deref()])),
      Arc::new(Int64Array::from(vec![row.created_at_ms])),
      Arc::new(Int64Array::from(vec![row.updated_at_ms])),
    ],
  )?;
  Ok(batch)
}

fn batch_to_file_row(batch: &RecordBatch, i: usize) -> Result<FileRow> {
  let get_str = |name: &str| -> Result<String> {
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
  let get_i64 = |name: &str| -> Result<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .map(|a| a.value(i))
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };
  let get_i64_opt = |name: &str| -> Option<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .filter(|a| !a.is_null(i))
      .map(|a| a.value(i))
  };

  let status: FileStatus = get_str("status")?
    .parse()
    .map_err(|e: String| DbError::InvalidInput(e))?;

  Ok(FileRow {
    file_id: get_str("file_id")?,
    path: get_str("path")?,
    size: get_i64("size")? as u64,
    mtime_ms: get_i64("mtime_ms")?,
    inode: get_i64_opt("inode").map(|v| v as u64),
    status,
    last_index_time_ms: get_i64_opt("last_index_time_ms"),
    last_error: get_str_opt("last_error"),
    created_at_ms: get_i64("created_at_ms")?,
    updated_at_ms: get_i64("updated_at_ms")?,
  })
}
