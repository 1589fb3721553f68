pub mod chunks;
pub mod connection;
pub mod files;
pub mod fts;
pub mod jobs;
pub mod meta;
pub mod migrations;
pub mod schema;
pub mod tombstones;
pub mod vectorstore;

pub use chunks::ChunkRecord;
pub use connection::{
  DbError, ProjectDb, Result, default_cache_dir, default_config_dir, default_data_dir, default_socket_dir,
};
pub use fts::{Bm25Index, LexicalIndex};
pub use migrations::{CURRENT_SCHEMA_VERSION, MIGRATIONS, Migration, MigrationRecord};
pub use schema::{DEFAULT_VECTOR_DIM, chunks_schema, files_schema, jobs_schema, meta_schema, tombstones_schema, vectors_schema};
pub use vectorstore::LanceVectorStore;
