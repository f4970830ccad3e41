//! Router - resolves orchestrator and worker identities to live actors
//!
//! Workers are spawned lazily the first time someone asks for them, and
//! respawned from persisted state if their actor has stopped. Everything an
//! actor needs beyond its own state (the state store, the indexer, the retry
//! policy) is shared from here.
//!
//! # Usage
//!
//! ```ignore
//! let router = Router::new(store, indexer, RetryPolicy::default(), cancel);
//! let orchestrator = router.spawn_orchestrator(config, source).await?;
//! orchestrator.start().await?;
//! ```

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
  handle::{OrchestratorHandle, WorkerHandle},
  orchestrator::{OrchestratorActor, OrchestratorConfig},
  retry::RetryPolicy,
  worker::WorkerActor,
};
use crate::{
  domain::item::{OrchestratorId, WorkerId},
  indexing::{ItemIndexer, source::DocumentSource},
  state::{StateError, StateStore},
};

/// What the router needs to bring an orchestrator back after it stopped
struct OrchestratorEntry {
  handle: OrchestratorHandle,
  config: OrchestratorConfig,
  source: Arc<dyn DocumentSource>,
}

struct RouterInner {
  orchestrators: DashMap<OrchestratorId, OrchestratorEntry>,
  workers: DashMap<WorkerId, WorkerHandle>,
  /// Serializes spawns so one identity never gets two live actors
  spawn_lock: Mutex<()>,
  store: Arc<dyn StateStore>,
  indexer: Arc<dyn ItemIndexer>,
  retry: RetryPolicy,
  cancel: CancellationToken,
}

/// Cheap to clone; every actor holds one
#[derive(Clone)]
pub struct Router {
  inner: Arc<RouterInner>,
}

impl Router {
  pub fn new(
    store: Arc<dyn StateStore>,
    indexer: Arc<dyn ItemIndexer>,
    retry: RetryPolicy,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      inner: Arc::new(RouterInner {
        orchestrators: DashMap::new(),
        workers: DashMap::new(),
        spawn_lock: Mutex::new(()),
        store,
        indexer,
        retry,
        cancel,
      }),
    }
  }

  pub fn state_store(&self) -> Arc<dyn StateStore> {
    Arc::clone(&self.inner.store)
  }

  pub fn indexer(&self) -> Arc<dyn ItemIndexer> {
    Arc::clone(&self.inner.indexer)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    self.inner.retry.clone()
  }

  /// Register and start an orchestrator, restoring whatever it persisted.
  ///
  /// Returns the existing handle if this id is already running.
  pub async fn spawn_orchestrator(
    &self,
    config: OrchestratorConfig,
    source: Arc<dyn DocumentSource>,
  ) -> Result<OrchestratorHandle, StateError> {
    let _guard = self.inner.spawn_lock.lock().await;

    if let Some(entry) = self.inner.orchestrators.get(&config.id)
      && !entry.handle.is_closed()
    {
      debug!(orchestrator = %config.id, "Reusing existing OrchestratorActor");
      return Ok(entry.handle.clone());
    }

    self.start_orchestrator(config, source).await
  }

  /// Caller holds `spawn_lock`
  async fn start_orchestrator(
    &self,
    config: OrchestratorConfig,
    source: Arc<dyn DocumentSource>,
  ) -> Result<OrchestratorHandle, StateError> {
    let (actor, handle) = OrchestratorActor::load(
      config.clone(),
      self.clone(),
      Arc::clone(&source),
      self.inner.cancel.child_token(),
    )
    .await?;

    // registered before recovery runs so restored workers can find their parent
    self.inner.orchestrators.insert(
      config.id.clone(),
      OrchestratorEntry {
        handle: handle.clone(),
        config: config.clone(),
        source,
      },
    );
    tokio::spawn(actor.run());

    info!(orchestrator = %config.id, pool_size = config.pool_size, "Spawned OrchestratorActor");
    Ok(handle)
  }

  /// Resolve a registered orchestrator, restarting it if its actor stopped.
  ///
  /// `None` for ids that were never spawned through this router.
  pub async fn orchestrator(&self, id: &OrchestratorId) -> Option<OrchestratorHandle> {
    let handle = self.inner.orchestrators.get(id).map(|e| e.handle.clone())?;
    if !handle.is_closed() {
      return Some(handle);
    }

    let _guard = self.inner.spawn_lock.lock().await;
    let (config, source) = {
      let entry = self.inner.orchestrators.get(id)?;
      if !entry.handle.is_closed() {
        return Some(entry.handle.clone());
      }
      (entry.config.clone(), Arc::clone(&entry.source))
    };

    warn!(orchestrator = %id, "OrchestratorActor stopped, restarting from persisted state");
    match self.start_orchestrator(config, source).await {
      Ok(handle) => Some(handle),
      Err(e) => {
        warn!(orchestrator = %id, err = %e, "Failed to restart OrchestratorActor");
        None
      }
    }
  }

  /// Get the actor for `id`, spawning it from persisted state if needed
  pub async fn worker(&self, id: &WorkerId) -> Result<WorkerHandle, StateError> {
    if let Some(handle) = self.inner.workers.get(id)
      && !handle.is_closed()
    {
      return Ok(handle.clone());
    }

    let _guard = self.inner.spawn_lock.lock().await;

    // check again, another task may have spawned it while we waited
    match self.inner.workers.entry(id.clone()) {
      Entry::Occupied(existing) if !existing.get().is_closed() => {
        debug!(worker = %id, "WorkerActor spawned by another task");
        return Ok(existing.get().clone());
      }
      Entry::Occupied(stale) => {
        warn!(worker = %id, "WorkerActor stopped, respawning from persisted state");
        stale.remove();
      }
      Entry::Vacant(_) => {}
    }

    let handle = WorkerActor::spawn(id.clone(), self.clone(), self.inner.cancel.child_token()).await?;
    self.inner.workers.insert(id.clone(), handle.clone());
    debug!(worker = %id, "Spawned WorkerActor");
    Ok(handle)
  }

  /// Snapshot of live worker ids, sorted
  pub fn list_workers(&self) -> Vec<WorkerId> {
    let mut ids: Vec<WorkerId> = self
      .inner
      .workers
      .iter()
      .filter(|e| !e.value().is_closed())
      .map(|e| e.key().clone())
      .collect();
    ids.sort();
    ids
  }

  pub fn list_orchestrators(&self) -> Vec<OrchestratorId> {
    let mut ids: Vec<OrchestratorId> = self.inner.orchestrators.iter().map(|e| e.key().clone()).collect();
    ids.sort();
    ids
  }

  /// Stop every actor. Persisted state is left as is for the next start.
  pub async fn shutdown_all(&self) {
    let orchestrators: Vec<OrchestratorHandle> =
      self.inner.orchestrators.iter().map(|e| e.handle.clone()).collect();
    let workers: Vec<WorkerHandle> = self.inner.workers.iter().map(|e| e.value().clone()).collect();

    if orchestrators.is_empty() && workers.is_empty() {
      return;
    }
    info!(
      orchestrators = orchestrators.len(),
      workers = workers.len(),
      "Shutting down all actors"
    );

    // best effort; a stopped actor has nothing to shut down
    let orchestrator_shutdowns = orchestrators.iter().map(|h| h.shutdown());
    futures::future::join_all(orchestrator_shutdowns).await;
    let worker_shutdowns = workers.iter().map(|h| h.shutdown());
    futures::future::join_all(worker_shutdowns).await;

    self.inner.orchestrators.clear();
    self.inner.workers.clear();
    info!("All actors shut down");
  }
}

// ============================================================================
// Tests
// ============================================================================
