//! Process composition root: wires the embedding capability, the project
//! registry, the router, and the control socket together, then drives the
//! server until ctrl-c or an RPC `shutdown` request. Generalizes the
//! teacher's pid-file/ctrl-c/XDG-dir `Daemon`/`DaemonConfig` pair, dropping
//! its session/decay scheduler in favor of the indexing scheduler in
//! [`crate::scheduler`].

use std::path::PathBuf;
use std::sync::Arc;

use knowdisk_core::capability::Embedder;
use knowdisk_db::default_data_dir;
use knowdisk_embedding::{CapabilityEmbedder, OllamaProvider, wrap_resilient_arc};
use thiserror::Error;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::project::ProjectRegistry;
use crate::router::Router;
use crate::scheduler::spawn_scheduler;
use crate::server::{Server, ShutdownHandle, default_socket_path};

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("server error: {0}")]
  Server(#[from] crate::server::ServerError),
}

/// How to reach the local embedding model. Ollama-only: no remote/
/// OpenRouter path is in scope for this daemon.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
  pub ollama_url: String,
  pub model: String,
  pub dimensions: usize,
}

impl Default for EmbeddingSettings {
  fn default() -> Self {
    Self {
      ollama_url: std::env::var("KNOWDISK_OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string()),
      model: std::env::var("KNOWDISK_EMBED_MODEL").unwrap_or_else(|_| "qwen3-embedding".to_string()),
      dimensions: std::env::var("KNOWDISK_EMBED_DIMS").ok().and_then(|v| v.parse().ok()).unwrap_or(4096),
    }
  }
}

/// Builds the Ollama-backed, retry-wrapped [`Embedder`] used by both the
/// resident daemon and the CLI's one-shot commands, so both paths embed
/// against the same settings.
pub fn create_embedder(settings: &EmbeddingSettings) -> Arc<dyn Embedder> {
  let provider = OllamaProvider::new().with_url(&settings.ollama_url).with_model(&settings.model, settings.dimensions);
  Arc::new(CapabilityEmbedder::new(wrap_resilient_arc(provider)))
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
  pub socket_path: PathBuf,
  pub data_dir: PathBuf,
  pub embedding: EmbeddingSettings,
  /// Watch-poll cadence for the background scheduler, in milliseconds.
  pub watch_poll_ms: u64,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self { socket_path: default_socket_path(), data_dir: default_data_dir(), embedding: EmbeddingSettings::default(), watch_poll_ms: 1000 }
  }
}

/// Owns the process-wide [`ProjectRegistry`] and the control socket's
/// [`ShutdownHandle`], set once `run` has bound the socket.
pub struct Daemon {
  config: DaemonConfig,
  registry: Arc<ProjectRegistry>,
  shutdown: Option<ShutdownHandle>,
  scheduler_shutdown_tx: Option<broadcast::Sender<()>>,
}

impl Daemon {
  pub fn new(config: DaemonConfig) -> Self {
    let embedder = create_embedder(&config.embedding);
    let registry = Arc::new(ProjectRegistry::new(config.data_dir.clone(), embedder));
    Self { config, registry, shutdown: None, scheduler_shutdown_tx: None }
  }

  pub async fn run(&mut self) -> Result<(), LifecycleError> {
    info!(socket = %self.config.socket_path.display(), data_dir = %self.config.data_dir.display(), "starting knowdisk daemon");

    let router = Arc::new(Router::new(Arc::clone(&self.registry)));
    let server = Server::with_socket_path(Arc::clone(&router), self.config.socket_path.clone());
    let shutdown = server.shutdown_handle();
    self.shutdown = Some(shutdown.clone());
    router.set_shutdown_handle(shutdown.clone());

    let (scheduler_shutdown_tx, scheduler_shutdown_rx) = broadcast::channel(1);
    self.scheduler_shutdown_tx = Some(scheduler_shutdown_tx.clone());
    let _scheduler_handle = spawn_scheduler(Arc::clone(&self.registry), self.config.watch_poll_ms, scheduler_shutdown_rx);
    info!("started background indexing scheduler");

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
      if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        return;
      }
      info!("received ctrl-c, shutting down");
      let _ = scheduler_shutdown_tx.send(());
      shutdown_clone.shutdown();
    });

    server.run().await?;
    info!("daemon shutdown complete");
    Ok(())
  }

  pub fn shutdown(&self) {
    if let Some(ref shutdown) = self.shutdown {
      shutdown.shutdown();
    }
  }

  pub fn registry(&self) -> Arc<ProjectRegistry> {
    Arc::clone(&self.registry)
  }
}

/// Whether a daemon is already listening on `socket_path`.
pub fn is_running(socket_path: &std::path::Path) -> bool {
  std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

pub fn pid_file_path() -> PathBuf {
  if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
    PathBuf::from(runtime_dir).join("knowdisk.pid")
  } else {
    PathBuf::from(format!("/tmp/knowdisk-{}.pid", std::process::id()))
  }
}

pub fn write_pid_file() -> std::io::Result<()> {
  std::fs::write(pid_file_path(), std::process::id().to_string())
}

pub fn remove_pid_file() {
  let _ = std::fs::remove_file(pid_file_path());
}
