use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use knowdisk_core::config::{Config, ToolPreset};
use knowdisk_core::project::resolve_project_path;
use knowdisk_daemon::{
  Daemon, DaemonConfig, EmbeddingSettings, ProjectRegistry, Request, create_embedder, default_socket_path, is_running,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "knowdisk")]
#[command(about = "Local-first knowledge indexer and hybrid retrieval engine")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ChangeKindArg {
  Add,
  Change,
  Unlink,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the resident daemon in the foreground (watcher + control socket).
  Serve {
    /// Override the control socket path.
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Override the data directory (lancedb tables, logs).
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Watch-poll cadence in milliseconds.
    #[arg(long, default_value = "1000")]
    watch_poll_ms: u64,
  },
  /// Full rebuild: reconcile every source path against disk, then drain.
  Rebuild {
    /// Project root (default: current directory, resolved to its nearest
    /// git root or ancestor with a `.knowdisk.toml`).
    #[arg(short, long)]
    project: Option<PathBuf>,
  },
  /// Feed one or more filesystem changes through the debouncer and drain.
  Incremental {
    #[arg(short, long)]
    project: Option<PathBuf>,
    /// Paths that changed on disk.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Event kind applied to every path in this call.
    #[arg(long, value_enum, default_value = "change")]
    kind: ChangeKindArg,
  },
  /// Scheduled reconcile: identical to rebuild's reconcile phase, recording
  /// `lastReconcileAt`.
  Reconcile {
    #[arg(short, long)]
    project: Option<PathBuf>,
  },
  /// Hybrid search against a project's index (talks to the running daemon).
  Search {
    query: String,
    #[arg(short, long)]
    project: Option<PathBuf>,
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
    /// Search titles (source paths) only; skips embedding and vector search.
    #[arg(long)]
    title_only: bool,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    socket: Option<PathBuf>,
  },
  /// Print the daemon's observable indexing status for a project.
  Status {
    #[arg(short, long)]
    project: Option<PathBuf>,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    socket: Option<PathBuf>,
  },
  /// Defer deletion of a source path (honoured at next startup even across
  /// a crash between the request and the actual delete).
  DeferDelete {
    path: PathBuf,
    #[arg(short, long)]
    project: Option<PathBuf>,
    #[arg(long)]
    socket: Option<PathBuf>,
  },
  /// Cancel a previously deferred source deletion.
  CancelDeferredDelete {
    path: PathBuf,
    #[arg(short, long)]
    project: Option<PathBuf>,
    #[arg(long)]
    socket: Option<PathBuf>,
  },
  /// Truncate every index-visible table for a project (schema retained).
  ClearIndex {
    #[arg(short, long)]
    project: Option<PathBuf>,
    #[arg(long)]
    socket: Option<PathBuf>,
  },
  /// Ask the running daemon to shut down.
  Shutdown {
    #[arg(long)]
    socket: Option<PathBuf>,
  },
  /// Manage `.knowdisk.toml` configuration.
  Config {
    #[command(subcommand)]
    action: ConfigAction,
  },
}

#[derive(Subcommand)]
enum ConfigAction {
  /// Write a commented `.knowdisk.toml` template to the project root.
  Init {
    #[arg(short, long)]
    project: Option<PathBuf>,
    /// Tool preset: minimal, standard, or full.
    #[arg(long, default_value = "standard")]
    preset: String,
    /// Overwrite an existing config file.
    #[arg(long)]
    force: bool,
  },
  /// Print the effective (project > user > default) configuration.
  Show {
    #[arg(short, long)]
    project: Option<PathBuf>,
    #[arg(long)]
    json: bool,
  },
}

fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}

/// Rolling daily log file under the data dir, console dropped. Returns the
/// guard that must outlive the process for buffered writes to flush.
fn init_daemon_logging(data_dir: &std::path::Path) -> Option<WorkerGuard> {
  if std::fs::create_dir_all(data_dir).is_err() {
    init_cli_logging();
    return None;
  }
  let appender = tracing_appender::rolling::daily(data_dir, "knowdisk-daemon.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let subscriber = tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false));
  if subscriber.try_init().is_err() {
    return None;
  }
  Some(guard)
}

fn resolve_project(project: Option<PathBuf>) -> Result<PathBuf> {
  let cwd = project.unwrap_or(std::env::current_dir().context("failed to resolve current directory")?);
  Ok(resolve_project_path(&cwd))
}

fn resolve_socket(socket: Option<PathBuf>) -> PathBuf {
  socket.unwrap_or_else(default_socket_path)
}

async fn call_daemon(socket: &std::path::Path, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
  if !is_running(socket) {
    bail!("no daemon listening at {} — start one with `knowdisk serve`", socket.display());
  }
  let request = Request { id: next_request_id(), method: method.to_string(), params };
  let response =
    knowdisk_daemon::call(socket, &request).await.with_context(|| format!("request to daemon at {} failed", socket.display()))?;
  if let Some(error) = response.error {
    bail!("daemon returned {}: {}", error.code, error.message);
  }
  Ok(response.result.unwrap_or(serde_json::json!({})))
}

/// A request id unique enough for a one-shot CLI call; the daemon never
/// correlates beyond echoing it back.
fn next_request_id() -> String {
  format!("cli-{}", std::process::id())
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let _guard = match &cli.command {
    Commands::Serve { data_dir, .. } => {
      let dir = data_dir.clone().unwrap_or_else(knowdisk_db::default_data_dir);
      init_daemon_logging(&dir)
    }
    _ => {
      init_cli_logging();
      None
    }
  };

  match cli.command {
    Commands::Serve { socket, data_dir, watch_poll_ms } => cmd_serve(socket, data_dir, watch_poll_ms).await,
    Commands::Rebuild { project } => cmd_rebuild(project).await,
    Commands::Incremental { project, paths, kind } => cmd_incremental(project, paths, kind).await,
    Commands::Reconcile { project } => cmd_reconcile(project).await,
    Commands::Search { query, project, top_k, title_only, json, socket } => cmd_search(query, project, top_k, title_only, json, socket).await,
    Commands::Status { project, json, socket } => cmd_status(project, json, socket).await,
    Commands::DeferDelete { path, project, socket } => cmd_defer_delete(path, project, socket).await,
    Commands::CancelDeferredDelete { path, project, socket } => cmd_cancel_deferred_delete(path, project, socket).await,
    Commands::ClearIndex { project, socket } => cmd_clear_index(project, socket).await,
    Commands::Shutdown { socket } => cmd_shutdown(socket).await,
    Commands::Config { action } => cmd_config(action).await,
  }
}

async fn cmd_serve(socket: Option<PathBuf>, data_dir: Option<PathBuf>, watch_poll_ms: u64) -> Result<()> {
  let mut config = DaemonConfig::default();
  if let Some(socket) = socket {
    config.socket_path = socket;
  }
  if let Some(data_dir) = data_dir {
    config.data_dir = data_dir;
  }
  config.watch_poll_ms = watch_poll_ms;

  tracing::info!(socket = %config.socket_path.display(), data_dir = %config.data_dir.display(), "starting knowdisk daemon");
  let mut daemon = Daemon::new(config);
  daemon.run().await.context("daemon exited with an error")
}

/// Wires the same embedder the resident daemon would use, so a one-shot
/// `rebuild`/`incremental`/`reconcile` embeds consistently with whatever the
/// daemon later picks up for this project.
fn one_shot_registry() -> Arc<ProjectRegistry> {
  let embedder = create_embedder(&EmbeddingSettings::default());
  Arc::new(ProjectRegistry::new(knowdisk_db::default_data_dir(), embedder))
}

async fn cmd_rebuild(project: Option<PathBuf>) -> Result<()> {
  let project_path = resolve_project(project)?;
  let registry = one_shot_registry();
  // `get_or_create` already starts the orchestrator (resetting any orphaned
  // `running` jobs and purging deferred source deletions) on first open.
  let handle = registry.get_or_create(&project_path).await.context("failed to open project")?;
  let outcome = handle.orchestrator.run_full_rebuild("manual").await.context("rebuild failed")?;
  println!(
    "rebuild: indexed_files={} errors={} repaired={}",
    outcome.indexed_files, outcome.errors, outcome.repaired
  );
  Ok(())
}

async fn cmd_incremental(project: Option<PathBuf>, paths: Vec<PathBuf>, kind: ChangeKindArg) -> Result<()> {
  let project_path = resolve_project(project)?;
  let registry = one_shot_registry();
  let handle = registry.get_or_create(&project_path).await.context("failed to open project")?;

  let fs_kind = match kind {
    ChangeKindArg::Add => knowdisk_index::FsEventKind::Add,
    ChangeKindArg::Change => knowdisk_index::FsEventKind::Change,
    ChangeKindArg::Unlink => knowdisk_index::FsEventKind::Unlink,
  };
  let changes: Vec<knowdisk_indexing::IncrementalChange> =
    paths.into_iter().map(|path| knowdisk_indexing::IncrementalChange { path, kind: fs_kind }).collect();

  let outcome = handle.orchestrator.run_incremental(&changes).await.context("incremental run failed")?;
  println!("incremental: indexed_files={} errors={}", outcome.indexed_files, outcome.errors);
  Ok(())
}

async fn cmd_reconcile(project: Option<PathBuf>) -> Result<()> {
  let project_path = resolve_project(project)?;
  let registry = one_shot_registry();
  let handle = registry.get_or_create(&project_path).await.context("failed to open project")?;
  let outcome = handle.orchestrator.run_scheduled_reconcile().await.context("reconcile failed")?;
  println!(
    "reconcile: indexed_files={} errors={} repaired={}",
    outcome.indexed_files, outcome.errors, outcome.repaired
  );
  Ok(())
}

async fn cmd_search(query: String, project: Option<PathBuf>, top_k: Option<usize>, title_only: bool, json: bool, socket: Option<PathBuf>) -> Result<()> {
  let project_path = resolve_project(project)?;
  let socket_path = resolve_socket(socket);
  let params = serde_json::json!({
    "project_path": project_path.to_string_lossy(),
    "query": query,
    "top_k": top_k,
    "title_only": title_only,
  });
  let result = call_daemon(&socket_path, "search_local_knowledge", params).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&result)?);
    return Ok(());
  }
  let results = result.get("results").and_then(|v| v.as_array()).cloned().unwrap_or_default();
  if results.is_empty() {
    println!("no results");
    return Ok(());
  }
  for row in results {
    let score = row.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let source_path = row.get("source_path").and_then(|v| v.as_str()).unwrap_or("?");
    let preview: String = row.get("chunk_text").and_then(|v| v.as_str()).unwrap_or("").chars().take(160).collect();
    println!("{score:.4}  {source_path}\n    {preview}");
  }
  Ok(())
}

async fn cmd_status(project: Option<PathBuf>, json: bool, socket: Option<PathBuf>) -> Result<()> {
  let project_path = resolve_project(project)?;
  let socket_path = resolve_socket(socket);
  let params = serde_json::json!({ "project_path": project_path.to_string_lossy() });
  let result = call_daemon(&socket_path, "status", params).await?;
  if json {
    println!("{}", serde_json::to_string_pretty(&result)?);
    return Ok(());
  }
  let get_str = |key: &str| result.get(key).and_then(|v| v.as_str()).unwrap_or("?").to_string();
  let get_num = |key: &str| result.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
  println!("project:     {}", get_str("project_id"));
  println!("run phase:   {}", get_str("run_phase"));
  println!("indexed:     {}", get_num("indexed_files"));
  println!("queue depth: {}", get_num("scheduler_queue_depth"));
  println!("uptime:      {}s", get_num("uptime_secs"));
  if let Some(errors) = result.get("errors").and_then(|v| v.as_array())
    && !errors.is_empty()
  {
    println!("errors:");
    for err in errors {
      println!("  - {}", err.as_str().unwrap_or(""));
    }
  }
  Ok(())
}

async fn cmd_defer_delete(path: PathBuf, project: Option<PathBuf>, socket: Option<PathBuf>) -> Result<()> {
  let project_path = resolve_project(project)?;
  let socket_path = resolve_socket(socket);
  let params = serde_json::json!({
    "project_path": project_path.to_string_lossy(),
    "path": path.to_string_lossy(),
  });
  call_daemon(&socket_path, "defer_delete", params).await?;
  println!("deferred deletion of {}", path.display());
  Ok(())
}

async fn cmd_cancel_deferred_delete(path: PathBuf, project: Option<PathBuf>, socket: Option<PathBuf>) -> Result<()> {
  let project_path = resolve_project(project)?;
  let socket_path = resolve_socket(socket);
  let params = serde_json::json!({
    "project_path": project_path.to_string_lossy(),
    "path": path.to_string_lossy(),
  });
  call_daemon(&socket_path, "cancel_deferred_delete", params).await?;
  println!("canceled deferred deletion of {}", path.display());
  Ok(())
}

async fn cmd_clear_index(project: Option<PathBuf>, socket: Option<PathBuf>) -> Result<()> {
  let project_path = resolve_project(project)?;
  let socket_path = resolve_socket(socket);
  let params = serde_json::json!({ "project_path": project_path.to_string_lossy() });
  call_daemon(&socket_path, "clear_index", params).await?;
  println!("cleared index data for {}", project_path.display());
  Ok(())
}

async fn cmd_shutdown(socket: Option<PathBuf>) -> Result<()> {
  let socket_path = resolve_socket(socket);
  call_daemon(&socket_path, "shutdown", serde_json::json!({})).await?;
  println!("shutdown requested");
  Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
  match action {
    ConfigAction::Init { project, preset, force } => {
      let project_path = resolve_project(project)?;
      let preset = match preset.to_lowercase().as_str() {
        "minimal" => ToolPreset::Minimal,
        "standard" => ToolPreset::Standard,
        "full" => ToolPreset::Full,
        other => bail!("unknown preset '{other}': expected minimal, standard, or full"),
      };
      let config_path = Config::project_config_path(&project_path);
      if config_path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", config_path.display());
      }
      std::fs::write(&config_path, Config::generate_template(preset)).with_context(|| format!("failed to write {}", config_path.display()))?;
      println!("wrote {}", config_path.display());
      Ok(())
    }
    ConfigAction::Show { project, json } => {
      let project_path = resolve_project(project)?;
      let config = Config::load_for_project(&project_path);
      if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
      } else {
        println!("{}", toml::to_string_pretty(&config).context("failed to render config as toml")?);
      }
      Ok(())
    }
  }
}
