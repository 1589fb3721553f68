//! JSON-RPC-style method dispatch, grounded in the teacher's
//! `Router::handle` method-string match. The three logical tools
//! (`search_local_knowledge`, `retrieve_document_by_path`,
//! `get_source_chunk_info`) are gated through [`Config::is_tool_enabled`];
//! `ping`/`status`/`shutdown` and the project-management verbs are always
//! available to a caller that can already reach the control socket.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use knowdisk_core::error::Error;
use knowdisk_core::validation::{optional_bool, optional_i64, require_string};
use knowdisk_retrieval::SearchOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use crate::project::ProjectRegistry;
use crate::server::ShutdownHandle;

/// Maps `Error::ToolDisabled` at the transport boundary, per the tool-calling
/// gate's `MCP_DISABLED` tag.
const ERROR_TOOL_DISABLED: i32 = -32001;
const ERROR_INVALID_PARAMS: i32 = -32602;
const ERROR_INTERNAL: i32 = -32000;
const ERROR_PARSE: i32 = -32700;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
  pub id: String,
  pub method: String,
  #[serde(default)]
  pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
  pub code: i32,
  pub message: String,
}

impl Response {
  pub fn ok(id: String, result: Value) -> Self {
    Self { id, result: Some(result), error: None }
  }

  pub fn err(id: String, code: i32, message: impl Into<String>) -> Self {
    Self { id, result: None, error: Some(RpcError { code, message: message.into() }) }
  }

  /// Response to a request that could not even be parsed, so has no `id`.
  pub fn parse_error(message: impl Into<String>) -> Self {
    Self::err(String::new(), ERROR_PARSE, message)
  }
}

impl From<Error> for RpcError {
  fn from(err: Error) -> Self {
    match err {
      Error::ToolDisabled => RpcError { code: ERROR_TOOL_DISABLED, message: "MCP_DISABLED".to_string() },
      Error::Validation(_) | Error::NotFound { .. } => RpcError { code: ERROR_INVALID_PARAMS, message: err.to_string() },
      other => RpcError { code: ERROR_INTERNAL, message: other.to_string() },
    }
  }
}

/// Dispatches one request at a time against the shared [`ProjectRegistry`].
/// Holds the server's [`ShutdownHandle`] so a `shutdown` request can stop the
/// accept loop; set once by the lifecycle composition root after the server
/// is constructed.
pub struct Router {
  registry: Arc<ProjectRegistry>,
  shutdown: Mutex<Option<ShutdownHandle>>,
  started_at: Instant,
  request_count: AtomicU64,
}

impl Router {
  pub fn new(registry: Arc<ProjectRegistry>) -> Self {
    Self { registry, shutdown: Mutex::new(None), started_at: Instant::now(), request_count: AtomicU64::new(0) }
  }

  pub fn set_shutdown_handle(&self, handle: ShutdownHandle) {
    *self.shutdown.lock().unwrap() = Some(handle);
  }

  #[instrument(level = "debug", skip(self), fields(method = %request.method))]
  pub async fn handle(&self, request: Request) -> Response {
    self.request_count.fetch_add(1, Ordering::Relaxed);
    let id = request.id.clone();
    match self.dispatch(&request).await {
      Ok(result) => Response::ok(id, result),
      Err(err) => Response { id, result: None, error: Some(err.into()) },
    }
  }

  async fn dispatch(&self, request: &Request) -> Result<Value, Error> {
    match request.method.as_str() {
      "ping" => Ok(json!({ "pong": true })),
      "status" => self.handle_status(request).await,
      "shutdown" => self.handle_shutdown(),
      "search_local_knowledge" => self.handle_search(request).await,
      "retrieve_document_by_path" => self.handle_retrieve_by_path(request).await,
      "get_source_chunk_info" => self.handle_chunk_info(request).await,
      "rebuild" => self.handle_rebuild(request).await,
      "reconcile" => self.handle_reconcile(request).await,
      "defer_delete" => self.handle_defer_delete(request).await,
      "cancel_deferred_delete" => self.handle_cancel_deferred_delete(request).await,
      "clear_index" => self.handle_clear_index(request).await,
      other => Err(Error::Validation(format!("unknown method: {other}"))),
    }
  }

  fn project_path(&self, request: &Request) -> Result<String, Error> {
    require_string(request.params.get("project_path"), "project_path").map_err(|e| Error::Validation(e.to_string()))
  }

  async fn handle_status(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    let status = project.orchestrator.status();
    Ok(json!({
      "project_id": project.project_id.as_str(),
      "uptime_secs": self.started_at.elapsed().as_secs(),
      "request_count": self.request_count.load(Ordering::Relaxed),
      "process_memory_kb": process_memory_kb(),
      "run_phase": format!("{:?}", status.run.phase),
      "indexed_files": status.run.indexed_files,
      "errors": status.run.errors,
      "last_reconcile_at": status.run.last_reconcile_at,
      "scheduler_queue_depth": status.scheduler.queue_depth,
    }))
  }

  fn handle_shutdown(&self) -> Result<Value, Error> {
    if let Some(handle) = self.shutdown.lock().unwrap().as_ref() {
      handle.shutdown();
    }
    Ok(json!({ "shutting_down": true }))
  }

  async fn handle_search(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    if !project.config.is_tool_enabled("search_local_knowledge") {
      return Err(Error::ToolDisabled);
    }
    let query = require_string(request.params.get("query"), "query").map_err(|e| Error::Validation(e.to_string()))?;
    let top_k = optional_i64(request.params.get("top_k"), "top_k")
      .map_err(|e| Error::Validation(e.to_string()))?
      .map(|n| n.max(0) as usize);
    let title_only =
      optional_bool(request.params.get("title_only"), "title_only").map_err(|e| Error::Validation(e.to_string()))?.unwrap_or(false);

    let results = project.retrieval.search(&query, SearchOptions { top_k, title_only }).await?;
    Ok(json!({ "results": results }))
  }

  async fn handle_retrieve_by_path(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    if !project.config.is_tool_enabled("retrieve_document_by_path") {
      return Err(Error::ToolDisabled);
    }
    let path = require_string(request.params.get("path"), "path").map_err(|e| Error::Validation(e.to_string()))?;
    let results = project.retrieval.retrieve_by_source_path(&path).await?;
    Ok(json!({ "results": results }))
  }

  async fn handle_chunk_info(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    if !project.config.is_tool_enabled("get_source_chunk_info") {
      return Err(Error::ToolDisabled);
    }
    let path = require_string(request.params.get("path"), "path").map_err(|e| Error::Validation(e.to_string()))?;
    let chunks = project.retrieval.get_source_chunk_info_by_path(&path).await?;
    Ok(json!({ "chunks": chunks }))
  }

  async fn handle_rebuild(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    let outcome = project.orchestrator.run_full_rebuild("manual").await?;
    Ok(json!({ "indexed_files": outcome.indexed_files, "errors": outcome.errors, "repaired": outcome.repaired }))
  }

  async fn handle_reconcile(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    let outcome = project.orchestrator.run_scheduled_reconcile().await?;
    Ok(json!({ "indexed_files": outcome.indexed_files, "errors": outcome.errors, "repaired": outcome.repaired }))
  }

  async fn handle_defer_delete(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    let path = require_string(request.params.get("path"), "path").map_err(|e| Error::Validation(e.to_string()))?;
    project.orchestrator.defer_source_deletion(&path).await?;
    Ok(json!({ "deferred": true }))
  }

  async fn handle_cancel_deferred_delete(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    let path = require_string(request.params.get("path"), "path").map_err(|e| Error::Validation(e.to_string()))?;
    project.orchestrator.cancel_deferred_source_deletion(&path).await?;
    Ok(json!({ "canceled": true }))
  }

  async fn handle_clear_index(&self, request: &Request) -> Result<Value, Error> {
    let project_path = self.project_path(request)?;
    let project = self.registry.get_or_create(Path::new(&project_path)).await?;
    project.orchestrator.clear_all_index_data().await?;
    Ok(json!({ "cleared": true }))
  }
}

/// Resident memory in KB, read from `/proc/self/statm`; `None` off Linux or
/// if the read fails.
#[cfg(target_os = "linux")]
fn process_memory_kb() -> Option<u64> {
  let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
  let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
  let page_size_kb = 4; // standard 4KiB pages on Linux
  Some(pages * page_size_kb)
}

#[cfg(not(target_os = "linux"))]
fn process_memory_kb() -> Option<u64> {
  None
}

#[cfg(test)]
mod tests {
  use super::*;
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

  async fn test_router() -> (TempDir, Router) {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    std::fs::create_dir(&data_dir).unwrap();
    let registry = Arc::new(ProjectRegistry::new(data_dir, Arc::new(FixedEmbedder)));
    (temp, Router::new(registry))
  }

  #[tokio::test]
  async fn test_ping() {
    let (_tmp, router) = test_router().await;
    let response = router.handle(Request { id: "1".into(), method: "ping".into(), params: json!({}) }).await;
    assert_eq!(response.id, "1");
    assert_eq!(response.result, Some(json!({ "pong": true })));
  }

  #[tokio::test]
  async fn test_unknown_method() {
    let (_tmp, router) = test_router().await;
    let response = router.handle(Request { id: "2".into(), method: "nope".into(), params: json!({}) }).await;
    assert!(response.result.is_none());
    assert!(response.error.is_some());
  }

  #[tokio::test]
  async fn search_is_rejected_when_tool_gate_disabled() {
    let (temp, router) = test_router().await;
    let project_path = temp.path().join("proj");
    std::fs::create_dir(&project_path).unwrap();

    let response = router
      .handle(Request {
        id: "3".into(),
        method: "search_local_knowledge".into(),
        params: json!({ "project_path": project_path.to_string_lossy(), "query": "hello" }),
      })
      .await;
    let error = response.error.unwrap();
    assert_eq!(error.code, ERROR_TOOL_DISABLED);
    assert_eq!(error.message, "MCP_DISABLED");
  }

  #[tokio::test]
  async fn search_enabled_via_project_config_succeeds() {
    let (temp, router) = test_router().await;
    let project_path = temp.path().join("proj");
    std::fs::create_dir(&project_path).unwrap();
    std::fs::write(project_path.join(".knowdisk.toml"), "[tools]\nenabled = true\npreset = \"full\"\n").unwrap();

    let response = router
      .handle(Request {
        id: "4".into(),
        method: "search_local_knowledge".into(),
        params: json!({ "project_path": project_path.to_string_lossy(), "query": "hello" }),
      })
      .await;
    assert!(response.error.is_none());
  }

  #[tokio::test]
  async fn shutdown_method_notifies_the_registered_handle() {
    let (_tmp, router) = test_router().await;
    let handle = ShutdownHandle::new();
    router.set_shutdown_handle(handle.clone());

    let notified = {
      let handle = handle.clone();
      tokio::spawn(async move { tokio::time::timeout(std::time::Duration::from_millis(200), handle.notified()).await.is_ok() })
    };

    router.handle(Request { id: "5".into(), method: "shutdown".into(), params: json!({}) }).await;
    assert!(notified.await.unwrap());
  }
}
