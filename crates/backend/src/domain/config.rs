//! Configuration for docindex with per-project overrides.
//!
//! Config priority: project-relative (.docindex/config.toml) > user (~/.config/docindex/config.toml) > defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ============================================================================
// Index Configuration
// ============================================================================

/// Corpus selection and pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  /// Directory walked for documents (defaults to the working directory)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub root: Option<PathBuf>,

  /// File extensions that make up the corpus (default: ["md"])
  pub extensions: Vec<String>,

  /// Number of workers created per run (default: number of CPUs)
  pub pool_size: usize,

  /// Identity of the orchestrator entity (default: "default")
  pub orchestrator_id: String,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      root: None,
      extensions: vec!["md".to_string()],
      pool_size: num_cpus::get().max(1),
      orchestrator_id: "default".to_string(),
    }
  }
}

// ============================================================================
// Splitter Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
  /// Maximum characters per segment (default: 500)
  pub segment_size: usize,

  /// Characters shared between consecutive segments (default: 50)
  pub overlap: usize,
}

impl Default for SplitterConfig {
  fn default() -> Self {
    Self {
      segment_size: 500,
      overlap: 50,
    }
  }
}

// ============================================================================
// Embedding Configuration
// ============================================================================

/// Embedding provider options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
  #[default]
  Ollama,
  OpenAi,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  /// Which embedding provider to use
  pub provider: EmbeddingProvider,

  /// Model name (e.g., "nomic-embed-text", "text-embedding-3-small")
  pub model: String,

  /// Embedding dimensions, must match model output
  pub dimensions: usize,

  /// Ollama server URL (only used when provider = ollama)
  pub ollama_url: String,

  /// Base URL of an OpenAI-compatible API (only used when provider = openai)
  pub openai_url: String,

  /// API key for the OpenAI-compatible provider
  /// If not set, reads from OPENAI_API_KEY env var
  #[serde(skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      provider: EmbeddingProvider::Ollama,
      model: "nomic-embed-text".to_string(),
      dimensions: 768,
      ollama_url: "http://localhost:11434".to_string(),
      openai_url: "https://api.openai.com/v1".to_string(),
      api_key: None,
    }
  }
}

impl EmbeddingConfig {
  pub fn resolved_api_key(&self) -> Option<String> {
    self
      .api_key
      .clone()
      .filter(|k| !k.trim().is_empty())
      .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()))
  }
}

// ============================================================================
// Store Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
  #[default]
  Lance,
  Memory,
}

/// Where vectors and entity state are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Vector store backend: lance or memory
  pub backend: StoreBackend,

  /// Vector table directory (defaults to <data dir>/vectors.lancedb)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,

  /// Table name (default: "segments")
  pub table: String,

  /// Directory for persisted orchestrator/worker state (defaults to <data dir>/state)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      backend: StoreBackend::Lance,
      path: None,
      table: "segments".to_string(),
      state_dir: None,
    }
  }
}

impl StoreConfig {
  pub fn resolved_path(&self) -> PathBuf {
    self.path.clone().unwrap_or_else(crate::dirs::default_store_dir)
  }

  pub fn resolved_state_dir(&self) -> PathBuf {
    self.state_dir.clone().unwrap_or_else(crate::dirs::default_state_dir)
  }
}

// ============================================================================
// Worker Configuration
// ============================================================================

/// Retry and pacing for the per-item indexing step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Attempts per item before it is reported failed (default: 3)
  pub max_attempts: u32,

  /// Backoff before the second attempt in milliseconds (default: 500)
  pub initial_backoff_ms: u64,

  /// Upper bound on backoff in milliseconds (default: 30000)
  pub max_backoff_ms: u64,

  /// Backoff growth per attempt (default: 2.0)
  pub backoff_multiplier: f64,

  /// Add up to 25% random jitter to backoff (default: true)
  pub jitter: bool,

  /// Wall-clock bound on one attempt in seconds (default: 600)
  pub step_timeout_secs: u64,

  /// Pause between segments in milliseconds, for provider rate limits (default: 0)
  pub segment_delay_ms: u64,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff_ms: 500,
      max_backoff_ms: 30_000,
      backoff_multiplier: 2.0,
      jitter: true,
      step_timeout_secs: 600,
      segment_delay_ms: 0,
    }
  }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  #[serde(default = "default_log_level")]
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  #[serde(default = "default_log_rotation")]
  pub log_rotation: String,

  /// Also write logs to a file in the data directory
  /// Default: false
  #[serde(default)]
  pub log_to_file: bool,

  /// Start a new run every N seconds while `docindex run` stays up (0 = never)
  /// Default: 0
  #[serde(default)]
  pub reindex_interval_secs: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}
fn default_log_rotation() -> String {
  "daily".to_string()
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: default_log_level(),
      log_rotation: default_log_rotation(),
      log_to_file: false,
      reindex_interval_secs: 0,
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
  #[serde(default)]
  pub index: IndexConfig,

  #[serde(default)]
  pub splitter: SplitterConfig,

  #[serde(default)]
  pub embedding: EmbeddingConfig,

  #[serde(default)]
  pub store: StoreConfig,

  #[serde(default)]
  pub worker: WorkerConfig,

  #[serde(default)]
  pub daemon: DaemonConfig,
}

impl Config {
  /// Load config for a project, with fallback to user config
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

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("docindex").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("docindex").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".docindex").join("config.toml")
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# docindex configuration
# Place in .docindex/config.toml (project) or ~/.config/docindex/config.toml (user)

# ============================================================================
# Corpus
# ============================================================================

[index]
# Directory to walk (defaults to the working directory)
# root = "docs"

# File extensions that make up the corpus
extensions = ["md"]

# Workers per run (defaults to the number of CPUs)
pool_size = {pool_size}

# Orchestrator identity; separate ids keep separate run state
orchestrator_id = "default"

# ============================================================================
# Splitting
# ============================================================================

[splitter]
segment_size = 500
overlap = 50

# ============================================================================
# Embedding Provider
# ============================================================================

[embedding]
# Provider: ollama (local) or openai (any OpenAI-compatible API)
provider = "ollama"
model = "nomic-embed-text"

# Embedding dimensions (must match model output)
# WARNING: changing dimensions requires a fresh vector table
dimensions = 768

ollama_url = "http://localhost:11434"
openai_url = "https://api.openai.com/v1"

# Can also be set via OPENAI_API_KEY env var
# api_key = "sk-..."

# ============================================================================
# Storage
# ============================================================================

[store]
# Backend: lance (on disk) or memory (discarded on exit)
backend = "lance"
table = "segments"
# path = "/var/lib/docindex/vectors.lancedb"
# state_dir = "/var/lib/docindex/state"

# ============================================================================
# Workers
# ============================================================================

[worker]
max_attempts = 3
initial_backoff_ms = 500
max_backoff_ms = 30000
backoff_multiplier = 2.0
jitter = true
step_timeout_secs = 600

# Pause between segments, for rate-limited providers
segment_delay_ms = 0

# ============================================================================
# Process
# ============================================================================

[daemon]
# Log level: off, error, warn, info, debug, trace
log_level = "info"

# Log file rotation: daily, hourly, never
log_rotation = "daily"
log_to_file = false

# Re-run indexing every N seconds while `docindex run` stays up (0 = never)
reindex_interval_secs = 0
"#,
      pool_size = defaults.index.pool_size,
    )
  }
}
