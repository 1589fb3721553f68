pub mod capability;
pub mod config;
pub mod error;
pub mod model;
pub mod project;
pub mod validation;

pub use capability::{
  Clock, Embedder, Parser, ParsedSegment, ParserResolution, Reranker, SourceReader, SystemClock, VectorStore,
};
pub use config::{
  ALL_TOOLS, Config, IndexingConfig, RetrievalConfig, ToolConfig, ToolPreset, WatchConfig, WorkerConfig,
};
pub use error::{Error, Result};
pub use model::{
  ChunkRow, FileRow, FileStatus, FtsChunkRow, FtsSearchRow, JobRow, JobStatus, JobType, RetrievalResult,
  SourceTombstone, VECTOR_PREVIEW_CHARS, VectorRow, VectorRowMetadata, VectorSearchRow, chunk_hash,
  chunk_id_for_span, file_id_for_path,
};
pub use project::{ProjectId, ProjectMetadata, find_git_root, resolve_project_path};
pub use validation::{
  ValidationError, ValidationResult, optional_array, optional_bool, optional_enum, optional_f64, optional_f64_range,
  optional_i64, optional_i64_range, optional_string, optional_string_array, optional_string_min, optional_u64,
  require_array, require_bool, require_enum, require_f64, require_f64_range, require_i64, require_i64_range,
  require_string, require_string_array, require_string_min, require_string_range, require_u64,
};
