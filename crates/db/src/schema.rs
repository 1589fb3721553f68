//! Arrow schemas for every lancedb table backing the repository.
//!
//! `files`/`chunks`/`jobs`/`tombstones`/`meta` hold the durable metadata;
//! `vectors` is a separate table backing `LanceVectorStore`, kept apart from
//! `chunks` because the `VectorStore` capability is an external collaborator,
//! not the repository itself.

use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub fn files_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("file_id", DataType::Utf8, false),
    Field::new("path", DataType::Utf8, false),
    Field::new("size", DataType::Int64, false),
    Field::new("mtime_ms", DataType::Int64, false),
    Field::new("inode", DataType::Int64, true),
    Field::new("status", DataType::Utf8, false),
    Field::new("last_index_time_ms", DataType::Int64, true),
    Field::new("last_error", DataType::Utf8, true),
    Field::new("created_at_ms", DataType::Int64, false),
    Field::new("updated_at_ms", DataType::Int64, false),
  ]))
}

/// Metadata + text for a chunk. Carries the full chunk text (not just the
/// bounded preview kept by `vectors`) because this table backs lexical BM25
/// scoring, which needs the whole span.
pub fn chunks_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("chunk_id", DataType::Utf8, false),
    Field::new("file_id", DataType::Utf8, false),
    Field::new("source_path", DataType::Utf8, false),
    Field::new("title", DataType::Utf8, false),
    Field::new("text", DataType::Utf8, false),
    Field::new("start_offset", DataType::Int64, true),
    Field::new("end_offset", DataType::Int64, true),
    Field::new("chunk_hash", DataType::Utf8, false),
    Field::new("token_count", DataType::Int64, true),
    Field::new("updated_at_ms", DataType::Int64, false),
  ]))
}

pub fn jobs_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("job_id", DataType::Utf8, false),
    Field::new("path", DataType::Utf8, false),
    Field::new("job_type", DataType::Utf8, false),
    Field::new("status", DataType::Utf8, false),
    Field::new("reason", DataType::Utf8, false),
    Field::new("attempt", DataType::Int64, false),
    Field::new("error", DataType::Utf8, true),
    Field::new("next_run_at_ms", DataType::Int64, false),
    Field::new("created_at_ms", DataType::Int64, false),
    Field::new("updated_at_ms", DataType::Int64, false),
  ]))
}

pub fn tombstones_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("path", DataType::Utf8, false),
    Field::new("deleted_time_ms", DataType::Int64, false),
  ]))
}

pub fn meta_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![Field::new("key", DataType::Utf8, false), Field::new("value", DataType::Utf8, false)]))
}

/// Backing store for `LanceVectorStore`. `chunk_text` is the bounded
/// `VECTOR_PREVIEW_CHARS` preview from `knowdisk_core::VectorRow`; full text
/// lives in `chunks`.
pub fn vectors_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("chunk_id", DataType::Utf8, false),
    Field::new("source_path", DataType::Utf8, false),
    Field::new("title", DataType::Utf8, true),
    Field::new("chunk_text", DataType::Utf8, false),
    Field::new("start_offset", DataType::Int64, true),
    Field::new("end_offset", DataType::Int64, true),
    Field::new("token_estimate", DataType::Int64, true),
    Field::new("updated_at", DataType::Int64, false),
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      true,
    ),
  ]))
}

/// Default vector width for local embedding models (e.g. `nomic-embed-text`).
pub const DEFAULT_VECTOR_DIM: usize = 768;
