//! Process-level wiring for the indexing orchestrator.
//!
//! # Architecture
//!
//! ```text
//! Daemon
//!   ├── Scheduler (optional periodic re-index)
//!   └── Router
//!         ├── OrchestratorActor (one per orchestrator id)
//!         └── WorkerActor (per worker id, spawned on demand)
//!               └── EmbeddingIndexer (splitter → embedder → vector store)
//! ```
//!
//! # Lifecycle
//!
//! 1. Create master `CancellationToken`
//! 2. Build the leaf components from `Config` (source, splitter, embedder, store)
//! 3. Create the `Router` over a `FileStateStore`
//! 4. Spawn the orchestrator, which restores and resumes any persisted run
//! 5. Spawn the `Scheduler` if a re-index interval is configured
//! 6. On shutdown: cancel, wait for the scheduler, stop all actors

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
  actor::{
    Router, Scheduler,
    handle::OrchestratorHandle,
    orchestrator::{
      OrchestratorConfig,
      state::{OrchestratorState, RunProgress},
    },
    retry::RetryPolicy,
    worker::state::WorkerState,
  },
  domain::{
    config::Config,
    item::{OrchestratorId, WorkerId},
  },
  embedding::{EmbeddingClient, EmbeddingError},
  indexing::{EmbeddingIndexer, ItemIndexer, source::DirectorySource, splitter::CharacterSplitter},
  state::{FileStateStore, StateError, load_json, orchestrator_key, worker_key},
  store::{StoreError, VectorStore},
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error("Failed to create embedding client: {0}")]
  Embedding(#[from] EmbeddingError),
  #[error("Failed to open vector store: {0}")]
  Store(#[from] StoreError),
  #[error("Failed to restore orchestrator state: {0}")]
  State(#[from] StateError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Everything needed to run the orchestrator in this process
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Corpus root, already resolved against the working directory
  pub root: PathBuf,
  pub config: Config,
}

impl RuntimeConfig {
  /// Load the effective config for `cwd` and resolve the corpus root
  pub fn load(cwd: &Path) -> Self {
    let config = Config::load_for_project(cwd);
    let root = match &config.index.root {
      Some(root) if root.is_absolute() => root.clone(),
      Some(root) => cwd.join(root),
      None => cwd.to_path_buf(),
    };
    Self { root, config }
  }

  pub fn orchestrator_id(&self) -> OrchestratorId {
    OrchestratorId::new(self.config.index.orchestrator_id.clone())
  }

  pub fn state_dir(&self) -> PathBuf {
    self.config.store.resolved_state_dir()
  }
}

// ============================================================================
// Daemon
// ============================================================================

/// A running orchestrator and the tasks that support it
pub struct Daemon {
  router: Router,
  orchestrator: OrchestratorHandle,
  cancel: CancellationToken,
  scheduler: Option<JoinHandle<()>>,
}

impl Daemon {
  /// Build every component from config and spawn the orchestrator.
  ///
  /// A run that was in progress when the last process stopped resumes here.
  pub async fn start(runtime: &RuntimeConfig) -> Result<Self, DaemonError> {
    let config = &runtime.config;
    let cancel = CancellationToken::new();

    let embedder = <dyn EmbeddingClient>::from_config(&config.embedding)?;
    info!(
      provider = embedder.name(),
      model = embedder.model_id(),
      dimensions = embedder.dimensions(),
      "Embedding client ready"
    );

    let vectors = <dyn VectorStore>::from_config(&config.store, embedder.dimensions()).await?;
    let splitter = Arc::new(CharacterSplitter::from_config(&config.splitter));
    let indexer: Arc<dyn ItemIndexer> = Arc::new(
      EmbeddingIndexer::new(splitter, embedder, vectors)
        .with_segment_delay(Duration::from_millis(config.worker.segment_delay_ms)),
    );

    let state_dir = runtime.state_dir();
    info!(state_dir = %state_dir.display(), root = %runtime.root.display(), "Opening orchestrator state");
    let store = Arc::new(FileStateStore::new(state_dir));

    let router = Router::new(
      store,
      indexer,
      RetryPolicy::from_config(&config.worker),
      cancel.child_token(),
    );

    let source = Arc::new(DirectorySource::from_config(runtime.root.clone(), &config.index));
    let orchestrator = router
      .spawn_orchestrator(
        OrchestratorConfig {
          id: runtime.orchestrator_id(),
          pool_size: config.index.pool_size.max(1),
        },
        source,
      )
      .await?;

    let scheduler = match config.daemon.reindex_interval_secs {
      0 => None,
      secs => {
        info!(interval_secs = secs, "Periodic re-index enabled");
        let scheduler = Scheduler::new(router.clone(), runtime.orchestrator_id(), Duration::from_secs(secs));
        Some(tokio::spawn(scheduler.run(cancel.child_token())))
      }
    };

    Ok(Self {
      router,
      orchestrator,
      cancel,
      scheduler,
    })
  }

  pub fn orchestrator(&self) -> &OrchestratorHandle {
    &self.orchestrator
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  /// Token that stops everything when cancelled
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Stop all actors. Persisted state is kept, so the next start resumes.
  pub async fn shutdown(self) {
    info!("Shutting down...");
    self.cancel.cancel();

    if let Some(scheduler) = self.scheduler
      && let Err(e) = scheduler.await
    {
      warn!(err = %e, "Scheduler task failed");
    }
    self.router.shutdown_all().await;

    info!("Shutdown complete");
  }
}

// ============================================================================
// Offline inspection
// ============================================================================

/// Persisted state of an orchestrator and its workers, read without spawning
#[derive(Debug, Clone)]
pub struct Snapshot {
  pub progress: RunProgress,
  pub workers: Vec<(WorkerId, WorkerState)>,
}

/// Read the persisted run state for `runtime`'s orchestrator
pub async fn snapshot(runtime: &RuntimeConfig) -> Result<Snapshot, StateError> {
  let store = FileStateStore::new(runtime.state_dir());
  let state: OrchestratorState = load_json(&store, &orchestrator_key(&runtime.orchestrator_id()))
    .await?
    .unwrap_or_default();

  let mut workers = Vec::with_capacity(state.workers.len());
  for id in &state.workers {
    if let Some(worker) = load_json::<WorkerState>(&store, &worker_key(id)).await? {
      workers.push((id.clone(), worker));
    }
  }

  Ok(Snapshot {
    progress: state.progress(),
    workers,
  })
}
