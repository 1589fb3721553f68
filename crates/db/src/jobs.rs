//! `jobs` table operations backing the durable work queue. Claiming is
//! read-then-update rather than a single atomic statement — lancedb has no
//! `UPDATE ... RETURNING` — so the worker pool is expected to run as a
//! single process per project, matching the repository's broader
//! single-writer assumption.

use std::sync::Arc;

use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use knowdisk_core::model::{JobRow, JobStatus, JobType};
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, trace};

use crate::connection::{DbError, ProjectDb, Result};
use crate::schema::jobs_schema;

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

impl ProjectDb {
  #[tracing::instrument(level = "trace", skip(self, row), fields(job_id = %row.job_id, path = %row.path))]
  pub async fn enqueue_job(&self, row: &JobRow) -> Result<()> {
    let table = self.jobs_table().await?;
    let batch = job_row_to_batch(row)?;
    let iter = RecordBatchIterator::new(vec![Ok(batch)], jobs_schema());
    table.add(Box::new(iter)).execute().await?;
    trace!(table = "jobs", operation = "enqueue", job_id = %row.job_id, "enqueued job");
    Ok(())
  }

  /// Pending jobs already due (`next_run_at_ms <= now_ms`), at most
  /// `batch_size` of them, transitioned in place to `running`.
  pub async fn claim_due_jobs(&self, now_ms: i64, batch_size: usize) -> Result<Vec<JobRow>> {
    let table = self.jobs_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("status = 'pending' AND next_run_at_ms <= {now_ms}"))
      .execute()
      .await?
      .try_collect()
      .await?;

    let mut candidates = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        candidates.push(batch_to_job_row(batch, i)?);
      }
    }
    candidates.sort_by_key(|j| j.next_run_at_ms);
    candidates.truncate(batch_size);

    let mut claimed = Vec::with_capacity(candidates.len());
    for mut job in candidates {
      job.status = JobStatus::Running;
      job.updated_at_ms = now_ms;
      table
        .update()
        .only_if(format!("job_id = '{}'", escape(&job.job_id)))
        .column("status", "'running'")
        .column("updated_at_ms", now_ms.to_string())
        .execute()
        .await?;
      claimed.push(job);
    }
    debug!(table = "jobs", operation = "claim", claimed = claimed.len(), "claimed due jobs");
    Ok(claimed)
  }

  pub async fn complete_job(&self, job_id: &str, now_ms: i64) -> Result<()> {
    let table = self.jobs_table().await?;
    table
      .update()
      .only_if(format!("job_id = '{}'", escape(job_id)))
      .column("status", "'done'")
      .column("updated_at_ms", now_ms.to_string())
      .execute()
      .await?;
    Ok(())
  }

  /// Mark terminally failed (attempts exhausted), recording the final
  /// attempt count the worker reached.
  pub async fn fail_job(&self, job_id: &str, attempt: u32, error: &str, now_ms: i64) -> Result<()> {
    let table = self.jobs_table().await?;
    table
      .update()
      .only_if(format!("job_id = '{}'", escape(job_id)))
      .column("status", "'failed'")
      .column("attempt", attempt.to_string())
      .column("error", format!("'{}'", escape(error)))
      .column("updated_at_ms", now_ms.to_string())
      .execute()
      .await?;
    Ok(())
  }

  /// Re-queue after a retryable failure: increment attempt, set next run
  /// time per the caller's backoff schedule, go back to `pending`.
  pub async fn retry_job(&self, job_id: &str, attempt: u32, error: &str, next_run_at_ms: i64, now_ms: i64) -> Result<()> {
    let table = self.jobs_table().await?;
    table
      .update()
      .only_if(format!("job_id = '{}'", escape(job_id)))
      .column("status", "'pending'")
      .column("attempt", attempt.to_string())
      .column("error", format!("'{}'", escape(error)))
      .column("next_run_at_ms", next_run_at_ms.to_string())
      .column("updated_at_ms", now_ms.to_string())
      .execute()
      .await?;
    Ok(())
  }

  /// On startup, any job left `running` belongs to a crashed process;
  /// return it to `pending` so it gets re-claimed.
  pub async fn reset_running_jobs_to_pending(&self, now_ms: i64) -> Result<usize> {
    let table = self.jobs_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if("status = 'running'")
      .execute()
      .await?
      .try_collect()
      .await?;
    let mut count = 0;
    for batch in &results {
      count += batch.num_rows();
    }
    if count > 0 {
      table
        .update()
        .only_if("status = 'running'")
        .column("status", "'pending'")
        .column("updated_at_ms", now_ms.to_string())
        .execute()
        .await?;
    }
    Ok(count)
  }

  pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobRow>> {
    let table = self.jobs_table().await?;
    let query = match status {
      Some(s) => table.query().only_if(format!("status = '{}'", s.as_str())),
      None => table.query(),
    };
    let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;
    let mut rows = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        rows.push(batch_to_job_row(batch, i)?);
      }
    }
    Ok(rows)
  }

  pub async fn clear_jobs(&self) -> Result<()> {
    let table = self.jobs_table().await?;
    table.delete("true").await?;
    Ok(())
  }
}

fn job_row_to_batch(row: &JobRow) -> Result<RecordBatch> {
  let batch = RecordBatch::try_new(
    jobs_schema(),
    vec![
      Arc::new(StringArray::from(vec![row.job_id.as_str()])),
      Arc::new(StringArray::from(vec![row.path.as_str()])),
      Arc::new(StringArray::from(vec![row.job_type.as_str()])),
      Arc::new(StringArray::from(vec![row.status.as_str()])),
      Arc::new(StringArray::from(vec![row.reason.as_str()])),
      Arc::new(Int64Array::from(vec![row.attempt as i64])),
      Arc::new(StringArray::from(vec![row.error.as_deref()])),
      Arc::new(Int64Array::from(vec![row.next_run_at_ms])),
      Arc::new(Int64Array::from(vec![row.created_at_ms])),
      Arc::new(Int64Array::from(vec![row.updated_at_ms])),
    ],
  )?;
  Ok(batch)
}

fn batch_to_job_row(batch: &RecordBatch, i: usize) -> Result<JobRow> {
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

  let job_type: JobType = get_str("job_type")?.parse().map_err(DbError::InvalidInput)?;
  let status: JobStatus = get_str("status")?.parse().map_err(DbError::InvalidInput)?;

  Ok(JobRow {
    job_id: get_str("job_id")?,
    path: get_str("path")?,
    job_type,
    status,
    reason: get_str("reason")?,
    attempt: get_i64("attempt")? as u32,
    error: get_str_opt("error"),
    next_run_at_ms: get_i64("next_run_at_ms")?,
    created_at_ms: get_i64("created_at_ms")?,
    updated_at_ms: get_i64("updated_at_ms")?,
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

  #[tokio::test]
  async fn claim_due_jobs_only_returns_ready_pending_jobs() {
    let (_tmp, db) = test_db().await;
    let due = JobRow::new_pending("j1", "/a.rs", JobType::Index, "watcher_add", 100, 0);
    let not_due = JobRow::new_pending("j2", "/b.rs", JobType::Index, "watcher_add", 500, 0);
    db.enqueue_job(&due).await.unwrap();
    db.enqueue_job(&not_due).await.unwrap();

    let claimed = db.claim_due_jobs(100, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job_id, "j1");
    assert_eq!(claimed[0].status, JobStatus::Running);

    let remaining_pending = db.list_jobs(Some(JobStatus::Pending)).await.unwrap();
    assert_eq!(remaining_pending.len(), 1);
    assert_eq!(remaining_pending[0].job_id, "j2");
  }

  #[tokio::test]
  async fn claim_respects_batch_size() {
    let (_tmp, db) = test_db().await;
    for i in 0..5 {
      let job = JobRow::new_pending(format!("j{i}"), format!("/f{i}.rs"), JobType::Index, "watcher_add", 0, 0);
      db.enqueue_job(&job).await.unwrap();
    }
    let claimed = db.claim_due_jobs(100, 2).await.unwrap();
    assert_eq!(claimed.len(), 2);
  }

  #[tokio::test]
  async fn complete_job_marks_done() {
    let (_tmp, db) = test_db().await;
    let job = JobRow::new_pending("j1", "/a.rs", JobType::Index, "watcher_add", 0, 0);
    db.enqueue_job(&job).await.unwrap();
    db.claim_due_jobs(0, 10).await.unwrap();
    db.complete_job("j1", 10).await.unwrap();

    let jobs = db.list_jobs(Some(JobStatus::Done)).await.unwrap();
    assert_eq!(jobs.len(), 1);
  }

  #[tokio::test]
  async fn retry_job_returns_it_to_pending_with_backoff() {
    let (_tmp, db) = test_db().await;
    let job = JobRow::new_pending("j1", "/a.rs", JobType::Index, "watcher_add", 0, 0);
    db.enqueue_job(&job).await.unwrap();
    db.claim_due_jobs(0, 10).await.unwrap();
    db.retry_job("j1", 1, "embed failed", 5000, 10).await.unwrap();

    let pending = db.list_jobs(Some(JobStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempt, 1);
    assert_eq!(pending[0].next_run_at_ms, 5000);
  }

  #[tokio::test]
  async fn reset_running_jobs_to_pending_recovers_crashed_claims() {
    let (_tmp, db) = test_db().await;
    let job = JobRow::new_pending("j1", "/a.rs", JobType::Index, "watcher_add", 0, 0);
    db.enqueue_job(&job).await.unwrap();
    db.claim_due_jobs(0, 10).await.unwrap();

    let reset = db.reset_running_jobs_to_pending(99).await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(db.list_jobs(Some(JobStatus::Pending)).await.unwrap().len(), 1);
  }
}
