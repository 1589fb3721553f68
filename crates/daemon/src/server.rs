//! Unix-socket JSON-RPC transport. Grounded in the teacher's daemon server
//! shape (bind a control socket, accept loop racing a shutdown signal,
//! one task per connection) but without its actor/codec machinery: requests
//! and responses are newline-delimited JSON read with a plain
//! [`tokio::io::AsyncBufReadExt::lines`] loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use knowdisk_db::default_socket_dir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::router::{Request, Response, Router};

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// A cloneable signal the router can use to ask the accept loop to stop.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
  pub fn new() -> Self {
    Self(Arc::new(Notify::new()))
  }

  pub fn shutdown(&self) {
    self.0.notify_waiters();
  }

  pub async fn notified(&self) {
    self.0.notified().await;
  }
}

impl Default for ShutdownHandle {
  fn default() -> Self {
    Self::new()
  }
}

pub fn default_socket_path() -> PathBuf {
  default_socket_dir().join("daemon.sock")
}

pub struct Server {
  router: Arc<Router>,
  socket_path: PathBuf,
  shutdown: ShutdownHandle,
}

impl Server {
  pub fn with_socket_path(router: Arc<Router>, socket_path: PathBuf) -> Self {
    Self { router, socket_path, shutdown: ShutdownHandle::new() }
  }

  pub fn shutdown_handle(&self) -> ShutdownHandle {
    self.shutdown.clone()
  }

  /// Bind the control socket and serve connections until a shutdown is
  /// signalled. Removes any stale socket file left behind by a prior crash
  /// before binding, and removes its own socket file on the way out.
  pub async fn run(self) -> Result<(), ServerError> {
    if let Some(parent) = self.socket_path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&self.socket_path);

    let listener = UnixListener::bind(&self.socket_path)?;
    info!(socket = %self.socket_path.display(), "daemon listening");

    loop {
      tokio::select! {
        accepted = listener.accept() => {
          match accepted {
            Ok((stream, _addr)) => {
              let router = Arc::clone(&self.router);
              tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, router).await {
                  warn!(error = %err, "connection handler failed");
                }
              });
            }
            Err(err) => warn!(error = %err, "failed to accept connection"),
          }
        }
        _ = self.shutdown.notified() => {
          info!("shutdown signalled, stopping accept loop");
          break;
        }
      }
    }

    let _ = std::fs::remove_file(&self.socket_path);
    Ok(())
  }
}

async fn handle_connection(stream: UnixStream, router: Arc<Router>) -> std::io::Result<()> {
  let (read_half, mut write_half) = stream.into_split();
  let mut lines = BufReader::new(read_half).lines();

  while let Some(line) = lines.next_line().await? {
    if line.trim().is_empty() {
      continue;
    }
    let response = match serde_json::from_str::<Request>(&line) {
      Ok(request) => router.handle(request).await,
      Err(err) => Response::parse_error(err.to_string()),
    };
    let mut payload = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    payload.push('\n');
    write_half.write_all(payload.as_bytes()).await?;
    write_half.flush().await?;
  }
  debug!("connection closed");
  Ok(())
}

#[derive(Error, Debug)]
pub enum ClientError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("daemon closed the connection without responding")]
  NoResponse,
}

/// One-shot client used by the CLI: connect, send a single request line,
/// read a single response line, disconnect.
pub async fn call(socket_path: &Path, request: &Request) -> Result<Response, ClientError> {
  let stream = UnixStream::connect(socket_path).await?;
  let (read_half, mut write_half) = stream.into_split();

  let mut payload = serde_json::to_string(request)?;
  payload.push('\n');
  write_half.write_all(payload.as_bytes()).await?;
  write_half.flush().await?;

  let mut lines = BufReader::new(read_half).lines();
  match lines.next_line().await? {
    Some(line) => Ok(serde_json::from_str(&line)?),
    None => Err(ClientError::NoResponse),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::project::ProjectRegistry;
  use async_trait::async_trait;
  use knowdisk_core::capability::Embedder;
  use serde_json::json;
  use tempfile::TempDir;

  struct FixedEmbedder;
  #[async_trait]
  impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> knowdisk_core::error::Result<Vec<f32>> {
      Ok(vec![text.len() as f32, 0.0, 0.0, 0.0])
    }
  }

  #[tokio::test]
  async fn ping_round_trips_over_the_socket() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();
    let registry = Arc::new(ProjectRegistry::new(data_dir, Arc::new(FixedEmbedder)));
    let router = Arc::new(Router::new(registry));
    let socket_path = temp.path().join("test.sock");
    let server = Server::with_socket_path(Arc::clone(&router), socket_path.clone());
    let shutdown = server.shutdown_handle();

    let handle = tokio::spawn(server.run());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let request = Request { id: "1".into(), method: "ping".into(), params: json!({}) };
    let response = call(&socket_path, &request).await.unwrap();
    assert_eq!(response.id, "1");
    assert!(response.error.is_none());

    shutdown.shutdown();
    handle.await.unwrap().unwrap();
  }
}
