pub mod lifecycle;
pub mod project;
pub mod router;
pub mod scheduler;
pub mod server;
pub mod source_reader;

pub use knowdisk_db::{default_cache_dir, default_config_dir, default_data_dir};
pub use lifecycle::{
  Daemon, DaemonConfig, EmbeddingSettings, LifecycleError, create_embedder, is_running, pid_file_path, remove_pid_file, write_pid_file,
};
pub use project::{ProjectHandle, ProjectRegistry};
pub use router::{Request, Response, Router, RpcError};
pub use scheduler::{Scheduler, spawn_scheduler};
pub use server::{ClientError, Server, ServerError, ShutdownHandle, call, default_socket_path};
pub use source_reader::FsSourceReader;
