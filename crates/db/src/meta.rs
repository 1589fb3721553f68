//! `meta` table: a flat key/value store for small pieces of durable state
//! that don't warrant their own table (last reconcile timestamp, etc).

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::connection::{ProjectDb, Result};
use crate::schema::meta_schema;

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

impl ProjectDb {
  pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    let table = self.meta_table().await?;
    table.delete(&format!("key = '{}'", escape(key))).await?;

    let batch = RecordBatch::try_new(
      meta_schema(),
      vec![Arc::new(StringArray::from(vec![key])), Arc::new(StringArray::from(vec![value]))],
    )?;
    let iter = RecordBatchIterator::new(vec![Ok(batch)], meta_schema());
    table.add(Box::new(iter)).execute().await?;
    Ok(())
  }

  pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
    let table = self.meta_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("key = '{}'", escape(key)))
      .execute()
      .await?
      .try_collect()
      .await?;

    for batch in &results {
      if batch.num_rows() > 0
        && let Some(values) = batch.column_by_name("value").and_then(|c| c.as_any().downcast_ref::<StringArray>())
      {
        return Ok(Some(values.value(0).to_string()));
      }
    }
    Ok(None)
  }
}
