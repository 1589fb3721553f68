//! Layered configuration for the indexer and its tool-calling gate.
//!
//! Priority: project-relative (`.knowdisk.toml`) > user
//! (`~/.config/knowdisk/config.toml`) > built-in defaults, exactly the
//! precedence the teacher crate uses for its own config file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The three logical tools the core exposes at the tool-calling boundary.
pub const ALL_TOOLS: &[&str] = &["search_local_knowledge", "retrieve_document_by_path", "get_source_chunk_info"];

/// Tools always available regardless of preset/gate (ping/status-style).
pub const INTERNAL_TOOLS: &[&str] = &["ping", "status"];

pub const PRESET_MINIMAL: &[&str] = &["search_local_knowledge"];
pub const PRESET_STANDARD: &[&str] = &["search_local_knowledge", "retrieve_document_by_path"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolPreset {
  Minimal,
  #[default]
  Standard,
  Full,
}

impl ToolPreset {
  pub fn tools(&self) -> Vec<&'static str> {
    match self {
      ToolPreset::Minimal => PRESET_MINIMAL.to_vec(),
      ToolPreset::Standard => PRESET_STANDARD.to_vec(),
      ToolPreset::Full => ALL_TOOLS.to_vec(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolConfig {
  /// Master gate; when `false` every tool call is rejected with `MCP_DISABLED`.
  pub enabled: bool,
  pub preset: ToolPreset,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub allow: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub deny: Option<Vec<String>>,
}

/// `indexing.watch.*`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  /// Scheduler debounce window in milliseconds.
  pub debounce_ms: u64,
}

impl Default for WatchConfig {
  fn default() -> Self {
    Self { debounce_ms: 500 }
  }
}

/// `indexing.worker.*` and `indexing.retry.*`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  pub concurrency: usize,
  pub batch_size: usize,
  pub max_attempts: u32,
  pub backoff_ms: Vec<u64>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      concurrency: 4,
      batch_size: 16,
      max_attempts: 3,
      backoff_ms: vec![1_000, 5_000, 30_000],
    }
  }
}

/// `indexing.*`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IndexingConfig {
  pub watch: WatchConfig,
  /// `indexing.reconcile.intervalMs`
  pub reconcile_interval_ms: u64,
  pub worker: WorkerConfig,
}

/// `retrieval.hybrid.*`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
  pub fts_top_n: usize,
  pub vector_top_k: usize,
  pub rerank_top_n: usize,
  /// Default `topK` when a query omits it.
  pub default_top_k: usize,
}

impl Default for RetrievalConfig {
  fn default() -> Self {
    Self {
      fts_top_n: 50,
      vector_top_k: 20,
      rerank_top_n: 10,
      default_top_k: 10,
    }
  }
}

/// Root configuration, loaded once per process and shared read-only by the
/// orchestrator, worker pool, and retrieval pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub indexing: IndexingConfig,
  pub retrieval: RetrievalConfig,
  pub tools: ToolConfig,
}

impl Config {
  pub fn enabled_tool_set(&self) -> HashSet<String> {
    let base: HashSet<String> = if let Some(ref allow) = self.tools.allow {
      allow.iter().cloned().collect()
    } else {
      self.tools.preset.tools().into_iter().map(String::from).collect()
    };
    if let Some(ref deny) = self.tools.deny {
      let deny: HashSet<_> = deny.iter().cloned().collect();
      base.difference(&deny).cloned().collect()
    } else {
      base
    }
  }

  pub fn is_tool_enabled(&self, tool: &str) -> bool {
    if INTERNAL_TOOLS.contains(&tool) {
      return true;
    }
    if !self.tools.enabled {
      return false;
    }
    self.enabled_tool_set().contains(tool)
  }

  /// Load config for a project, with fallback to user config, falling back
  /// to built-in defaults if neither file parses.
  pub fn load_for_project(project_path: &Path) -> Self {
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KNOWDISK_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("knowdisk").join("config.toml"));
    }
    dirs::config_dir().map(|p: PathBuf| p.join("knowdisk").join("config.toml"))
  }

  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".knowdisk.toml")
  }

  pub fn generate_template(preset: ToolPreset) -> String {
    let preset_name = match preset {
      ToolPreset::Minimal => "minimal",
      ToolPreset::Standard => "standard",
      ToolPreset::Full => "full",
    };

    format!(
      r#"# knowdisk configuration
# Place at <project>/.knowdisk.toml or ~/.config/knowdisk/config.toml

[indexing.watch]
# Scheduler debounce window (ms); trailing debounce reset on every fs event.
debounce_ms = 500

[indexing]
# Scheduled reconcile cadence (ms), driven by the caller.
reconcile_interval_ms = 900000

[indexing.worker]
concurrency = 4
batch_size = 16
max_attempts = 3
backoff_ms = [1000, 5000, 30000]

[retrieval]
fts_top_n = 50
vector_top_k = 20
rerank_top_n = 10
default_top_k = 10

[tools]
enabled = false
# Preset: minimal, standard, or full ({tool_count} tools total)
preset = "{preset_name}"
# allow = ["search_local_knowledge"]
# deny = ["retrieve_document_by_path"]
"#,
      tool_count = ALL_TOOLS.len(),
      preset_name = preset_name
    )
  }
}
