//! Error taxonomy shared across the core and every crate that implements a
//! capability for it. Variants name *kinds*, not call sites: a `StorageError`
//! from the repository and a `StorageError` surfaced through the worker are
//! the same kind of failure, just observed from different layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  /// Durable-store failure. Never retried inside the repository itself; the
  /// worker pool decides whether a caller-facing retry makes sense.
  #[error("storage error: {0}")]
  Storage(String),

  /// Byte stream could not be turned into text spans by a `Parser`.
  #[error("parse error: {0}")]
  Parse(String),

  /// `Embedder::embed` failed. Transient by default; the worker retries it.
  #[error("embedding error: {0}")]
  Embed(String),

  /// `VectorStore` operation failed. Transient by default.
  #[error("vector store error: {0}")]
  VectorStore(String),

  /// The path's extension has no registered parser. Not a failure: the
  /// caller completes the job as a no-op.
  #[error("unsupported file: {0}")]
  UnsupportedFile(String),

  /// Indexing was attempted under a path covered by an active source
  /// tombstone. Surfaced as a skipped job, not a failure.
  #[error("path is under an active source tombstone: {0}")]
  TombstoneViolation(String),

  /// Invalid retrieval/indexing configuration, surfaced synchronously to the
  /// caller rather than through the job/worker machinery.
  #[error("config error: {0}")]
  Config(String),

  /// The tool-calling gate is disabled. Maps to the `MCP_DISABLED` tag at
  /// the transport boundary.
  #[error("tool calling is disabled")]
  ToolDisabled,

  #[error("not found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("validation error: {0}")]
  Validation(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Whether the worker pool should retry this error (vs. treating it as
  /// terminal on first claim). Mirrors §7: storage, unsupported, tombstone,
  /// config, and tool-disabled are never retried; parse/embed/vector-store
  /// failures are retried up to `maxAttempts`.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::Parse(_) | Error::Embed(_) | Error::VectorStore(_) | Error::Io(_))
  }
}

pub type Result<T> = std::result::Result<T, Error>;
