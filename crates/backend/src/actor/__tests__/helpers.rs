//! Test helpers for actor integration tests.
//!
//! Provides `TestContext`, which wires a router to an in-memory state store
//! and a scripted indexer, and can simulate a process restart by cancelling
//! every actor and building a fresh router over the same store.

use std::{
  collections::HashSet,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
  actor::{
    handle::OrchestratorHandle,
    orchestrator::{OrchestratorConfig, state::RunProgress},
    retry::RetryPolicy,
    router::Router,
  },
  domain::item::{ItemRef, OrchestratorId, WorkerId},
  indexing::{
    IndexReport, IndexingError, ItemIndexer,
    source::{DocumentSource, SourceError},
  },
  state::MemoryStateStore,
};

// ============================================================================
// Scripted indexer
// ============================================================================

/// Indexer whose behavior is set per item.
///
/// When gated, every call waits for a permit from [`ScriptedIndexer::release`],
/// which lets a test hold items in flight.
#[derive(Default)]
pub struct ScriptedIndexer {
  calls: DashMap<ItemRef, usize>,
  permanent: Mutex<HashSet<ItemRef>>,
  /// Transient failures left before the item succeeds
  flaky: DashMap<ItemRef, usize>,
  gate: Option<Semaphore>,
}

impl ScriptedIndexer {
  pub fn gated() -> Self {
    Self {
      gate: Some(Semaphore::new(0)),
      ..Default::default()
    }
  }

  /// Let `n` more steps through the gate
  pub fn release(&self, n: usize) {
    if let Some(gate) = &self.gate {
      gate.add_permits(n);
    }
  }

  pub fn fail_permanently(&self, item: &str) {
    self.permanent.lock().unwrap().insert(ItemRef::new(item));
  }

  pub fn fail_transiently(&self, item: &str, times: usize) {
    self.flaky.insert(ItemRef::new(item), times);
  }

  pub fn calls(&self, item: &str) -> usize {
    self.calls.get(&ItemRef::new(item)).map(|c| *c).unwrap_or(0)
  }

  pub fn total_calls(&self) -> usize {
    self.calls.iter().map(|c| *c.value()).sum()
  }
}

#[async_trait]
impl ItemIndexer for ScriptedIndexer {
  async fn index(&self, item: &ItemRef) -> Result<IndexReport, IndexingError> {
    if let Some(gate) = &self.gate
      && let Ok(permit) = gate.acquire().await
    {
      permit.forget();
    }

    *self.calls.entry(item.clone()).or_insert(0) += 1;

    if self.permanent.lock().unwrap().contains(item) {
      return Err(IndexingError::NotFound(item.clone()));
    }
    if let Some(mut remaining) = self.flaky.get_mut(item)
      && *remaining > 0
    {
      *remaining -= 1;
      return Err(IndexingError::Read {
        item: item.clone(),
        source: std::io::Error::other("flaky read"),
      });
    }

    Ok(IndexReport {
      segments: 1,
      ..Default::default()
    })
  }
}

/// Indexer that never finishes, for exercising the step timeout
pub struct HangingIndexer;

#[async_trait]
impl ItemIndexer for HangingIndexer {
  async fn index(&self, _item: &ItemRef) -> Result<IndexReport, IndexingError> {
    std::future::pending().await
  }
}

// ============================================================================
// Static source
// ============================================================================

/// Corpus fixed by the test
#[derive(Default)]
pub struct StaticSource {
  items: Mutex<Vec<ItemRef>>,
  failing: AtomicBool,
}

impl StaticSource {
  pub fn new(items: &[&str]) -> Self {
    Self {
      items: Mutex::new(items.iter().map(|i| ItemRef::new(*i)).collect()),
      failing: AtomicBool::new(false),
    }
  }

  pub fn set_items(&self, items: &[&str]) {
    *self.items.lock().unwrap() = items.iter().map(|i| ItemRef::new(*i)).collect();
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }
}

#[async_trait]
impl DocumentSource for StaticSource {
  async fn list(&self) -> Result<Vec<ItemRef>, SourceError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(SourceError::Walk("listing refused".to_string()));
    }
    Ok(self.items.lock().unwrap().clone())
  }
}

/// `n` distinct item names: doc-00.md, doc-01.md, ...
pub fn items(n: usize) -> Vec<String> {
  (0..n).map(|i| format!("doc-{:02}.md", i)).collect()
}

pub fn as_strs(items: &[String]) -> Vec<&str> {
  items.iter().map(String::as_str).collect()
}

// ============================================================================
// Test context
// ============================================================================

pub fn fast_retry() -> RetryPolicy {
  RetryPolicy {
    max_attempts: 3,
    initial_backoff: Duration::from_millis(1),
    max_backoff: Duration::from_millis(5),
    backoff_multiplier: 2.0,
    jitter: false,
    step_timeout: Duration::from_secs(5),
  }
}

pub struct TestContext {
  pub store: MemoryStateStore,
  pub indexer: Arc<dyn ItemIndexer>,
  pub source: Arc<StaticSource>,
  pub retry: RetryPolicy,
  pub cancel: CancellationToken,
  pub router: Router,
}

impl TestContext {
  pub fn new(indexer: Arc<dyn ItemIndexer>, source: StaticSource) -> Self {
    Self::with_retry(indexer, source, fast_retry())
  }

  pub fn with_retry(indexer: Arc<dyn ItemIndexer>, source: StaticSource, retry: RetryPolicy) -> Self {
    let store = MemoryStateStore::new();
    let cancel = CancellationToken::new();
    let router = Router::new(Arc::new(store.clone()), Arc::clone(&indexer), retry.clone(), cancel.clone());

    Self {
      store,
      indexer,
      source: Arc::new(source),
      retry,
      cancel,
      router,
    }
  }

  pub fn orchestrator_id() -> OrchestratorId {
    OrchestratorId::new("test")
  }

  pub fn worker_id(index: usize) -> WorkerId {
    WorkerId::for_pool(&Self::orchestrator_id(), index)
  }

  pub async fn spawn(&self, pool_size: usize) -> OrchestratorHandle {
    let config = OrchestratorConfig {
      id: Self::orchestrator_id(),
      pool_size,
    };
    self
      .router
      .spawn_orchestrator(config, self.source.clone())
      .await
      .expect("spawn orchestrator")
  }

  /// Kill every actor and come back up over the same persisted state.
  ///
  /// `indexer` replaces the one the next router hands to workers.
  pub async fn restart(&mut self, indexer: Arc<dyn ItemIndexer>, pool_size: usize) -> OrchestratorHandle {
    self.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    self.cancel = CancellationToken::new();
    self.indexer = indexer;
    self.router = Router::new(
      Arc::new(self.store.clone()),
      Arc::clone(&self.indexer),
      self.retry.clone(),
      self.cancel.clone(),
    );
    self.spawn(pool_size).await
  }
}

impl Drop for TestContext {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(10);

  while start.elapsed() < timeout {
    if check().await {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  false
}

/// Wait until the orchestrator's progress satisfies `predicate`
pub async fn wait_for_progress(
  handle: &OrchestratorHandle,
  predicate: impl Fn(&RunProgress) -> bool,
) -> Option<RunProgress> {
  let start = std::time::Instant::now();
  while start.elapsed() < Duration::from_secs(5) {
    if let Ok(progress) = handle.progress().await
      && predicate(&progress)
    {
      return Some(progress);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  None
}

/// Wait for the run to finish and return its final progress
pub async fn wait_until_idle(handle: &OrchestratorHandle) -> RunProgress {
  wait_for_progress(handle, |p| {
    p.status == crate::actor::orchestrator::state::RunStatus::Idle && p.last_run.is_some()
  })
  .await
  .expect("run should finish")
}
