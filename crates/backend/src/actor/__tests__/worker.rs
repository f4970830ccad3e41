//! Worker E2E tests: busy rejection, durable acceptance, outcome delivery.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{ScriptedIndexer, StaticSource, TestContext, wait_for},
      worker::{
        WorkerError,
        state::{ItemOutcome, WorkerState, WorkerStatus},
      },
    },
    domain::item::{ItemRef, OrchestratorId},
    state::{load_json, worker_key},
  };

  fn context(indexer: Arc<ScriptedIndexer>) -> TestContext {
    TestContext::new(indexer, StaticSource::default())
  }

  #[tokio::test]
  async fn test_second_process_rejected_while_busy() {
    let indexer = Arc::new(ScriptedIndexer::gated());
    let ctx = context(indexer.clone());
    let worker = ctx.router.worker(&TestContext::worker_id(0)).await.unwrap();
    let parent = TestContext::orchestrator_id();

    worker.process(parent.clone(), None, ItemRef::new("a.md")).await.expect("first item");
    let before = worker.state().await.unwrap();

    let err = worker
      .process(parent, None, ItemRef::new("b.md"))
      .await
      .expect_err("second item while busy");
    match err {
      WorkerError::Busy { item, .. } => assert_eq!(item, Some(ItemRef::new("a.md"))),
      other => panic!("expected Busy, got {:?}", other),
    }

    let after = worker.state().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.status, WorkerStatus::Indexing);
    assert_eq!(indexer.calls("b.md"), 0);
  }

  #[tokio::test]
  async fn test_acceptance_persisted_before_ack() {
    let indexer = Arc::new(ScriptedIndexer::gated());
    let ctx = context(indexer);
    let id = TestContext::worker_id(0);
    let worker = ctx.router.worker(&id).await.unwrap();

    worker
      .process(TestContext::orchestrator_id(), None, ItemRef::new("a.md"))
      .await
      .expect("accept");

    let stored: WorkerState = load_json(&ctx.store, &worker_key(&id))
      .await
      .unwrap()
      .expect("worker state persisted");
    assert_eq!(stored.status, WorkerStatus::Indexing);
    assert_eq!(stored.current_item, Some(ItemRef::new("a.md")));
    assert_eq!(stored.parent_id, Some(TestContext::orchestrator_id()));
  }

  #[tokio::test]
  async fn test_outcome_kept_until_parent_acknowledges() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let ctx = context(indexer);
    let worker = ctx.router.worker(&TestContext::worker_id(0)).await.unwrap();

    // no orchestrator named "ghost" is running
    worker
      .process(OrchestratorId::new("ghost"), None, ItemRef::new("a.md"))
      .await
      .expect("accept");

    let idle = wait_for(Duration::from_secs(2), || async {
      worker.state().await.is_ok_and(|s| s.status == WorkerStatus::Idle)
    })
    .await;
    assert!(idle, "worker should finish the item");

    let state = worker.state().await.unwrap();
    assert_eq!(state.current_item, Some(ItemRef::new("a.md")));
    assert_eq!(
      state.unreported,
      Some(ItemOutcome::Completed {
        item: ItemRef::new("a.md")
      })
    );
  }

  #[tokio::test]
  async fn test_permanent_failure_reported_as_failed() {
    let indexer = Arc::new(ScriptedIndexer::default());
    indexer.fail_permanently("bad.md");
    let ctx = context(indexer.clone());
    let worker = ctx.router.worker(&TestContext::worker_id(0)).await.unwrap();

    worker
      .process(OrchestratorId::new("ghost"), None, ItemRef::new("bad.md"))
      .await
      .expect("accept");

    let failed = wait_for(Duration::from_secs(2), || async {
      worker
        .state()
        .await
        .is_ok_and(|s| matches!(s.unreported, Some(ItemOutcome::Failed { .. })))
    })
    .await;
    assert!(failed);
    assert_eq!(indexer.calls("bad.md"), 1);
  }

  #[tokio::test]
  async fn test_worker_accepts_again_after_finishing() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let ctx = context(indexer.clone());
    let worker = ctx.router.worker(&TestContext::worker_id(0)).await.unwrap();
    let parent = OrchestratorId::new("ghost");

    worker.process(parent.clone(), None, ItemRef::new("a.md")).await.expect("first");
    wait_for(Duration::from_secs(2), || async {
      worker.state().await.is_ok_and(|s| !s.is_busy())
    })
    .await;

    worker.process(parent, None, ItemRef::new("b.md")).await.expect("second");
    let state = worker.state().await.unwrap();
    assert_eq!(state.current_item, Some(ItemRef::new("b.md")));
    assert_eq!(state.assignment, 2);
  }

  #[tokio::test]
  async fn test_persist_failure_stops_worker() {
    let indexer = Arc::new(ScriptedIndexer::gated());
    let ctx = context(indexer);
    let id = TestContext::worker_id(0);
    let worker = ctx.router.worker(&id).await.unwrap();

    ctx.store.set_failing(true);
    let err = worker
      .process(TestContext::orchestrator_id(), None, ItemRef::new("a.md"))
      .await
      .expect_err("persist should fail");
    assert!(matches!(err, WorkerError::Substrate(_)));

    worker.tx.closed().await;
    assert!(!ctx.store.contains(&worker_key(&id)));

    // a fresh actor comes back from the last good (empty) state
    ctx.store.set_failing(false);
    let respawned = ctx.router.worker(&id).await.unwrap();
    let state = respawned.state().await.unwrap();
    assert_eq!(state, WorkerState::default());
  }
}
