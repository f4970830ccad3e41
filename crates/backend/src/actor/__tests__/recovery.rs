//! Restart E2E tests: every actor resumes from its persisted state.

#[cfg(test)]
mod tests {
  use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
  };

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      Scheduler,
      __tests__::helpers::{ScriptedIndexer, StaticSource, TestContext, as_strs, items, wait_for, wait_until_idle},
      orchestrator::{
        OrchestratorError,
        state::{OrchestratorState, RunStatus},
      },
      worker::state::{ItemOutcome, WorkerState, WorkerStatus},
    },
    domain::item::ItemRef,
    state::{load_json, orchestrator_key, save_json, worker_key},
  };

  fn gated(n: usize) -> (TestContext, Arc<ScriptedIndexer>) {
    let indexer = Arc::new(ScriptedIndexer::gated());
    let names = items(n);
    let ctx = TestContext::new(indexer.clone(), StaticSource::new(&as_strs(&names)));
    (ctx, indexer)
  }

  #[tokio::test]
  async fn test_running_run_resumes_after_restart() {
    let (mut ctx, _old) = gated(4);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");
    let before = handle.progress().await.unwrap();
    assert_eq!(before.in_flight, 2);

    let fresh = Arc::new(ScriptedIndexer::default());
    let handle = ctx.restart(fresh.clone(), 2).await;

    let done = wait_until_idle(&handle).await;
    let summary = done.last_run.expect("summary");
    assert_eq!(summary.run_id, before.run_id);
    assert_eq!(summary.completed, 4);
    assert!(summary.failed.is_empty());

    // in-flight items were replayed once, pending ones indexed once
    for name in items(4) {
      assert_eq!(fresh.calls(&name), 1, "{}", name);
    }
  }

  #[tokio::test]
  async fn test_pause_survives_restart() {
    let (mut ctx, old) = gated(4);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");
    handle.pause().await.expect("pause");
    old.release(2);
    crate::actor::__tests__::helpers::wait_for_progress(&handle, |p| p.completed == 2)
      .await
      .expect("drain");

    let fresh = Arc::new(ScriptedIndexer::default());
    let handle = ctx.restart(fresh.clone(), 2).await;

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.status, RunStatus::Paused);
    assert_eq!(progress.pending, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fresh.total_calls(), 0);

    handle.resume().await.expect("resume");
    let summary = wait_until_idle(&handle).await.last_run.expect("summary");
    assert_eq!(summary.completed, 4);
  }

  #[tokio::test]
  async fn test_unacknowledged_outcome_redelivered() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let ctx = TestContext::new(indexer.clone(), StaticSource::default());
    let item = ItemRef::new("a.md");
    let worker = TestContext::worker_id(0);

    // crashed after the worker persisted its outcome, before the parent did
    let orchestrator_state = OrchestratorState {
      status: RunStatus::Running,
      run_id: Some("run-1".to_string()),
      initial_count: 1,
      pending: VecDeque::new(),
      allocations: BTreeMap::from([(item.clone(), worker.clone())]),
      workers: vec![worker.clone()],
      ..Default::default()
    };
    let worker_state = WorkerState {
      parent_id: Some(TestContext::orchestrator_id()),
      run_id: Some("run-1".to_string()),
      current_item: Some(item.clone()),
      status: WorkerStatus::Idle,
      unreported: Some(ItemOutcome::Completed { item: item.clone() }),
      assignment: 1,
    };
    save_json(&ctx.store, &orchestrator_key(&TestContext::orchestrator_id()), &orchestrator_state)
      .await
      .unwrap();
    save_json(&ctx.store, &worker_key(&worker), &worker_state).await.unwrap();

    let handle = ctx.spawn(1).await;
    let summary = wait_until_idle(&handle).await.last_run.expect("summary");
    assert_eq!(summary.run_id.as_deref(), Some("run-1"));
    assert_eq!(summary.completed, 1);
    assert_eq!(indexer.total_calls(), 0);

    let cleared = wait_for(Duration::from_secs(2), || async {
      load_json::<WorkerState>(&ctx.store, &worker_key(&worker))
        .await
        .ok()
        .flatten()
        .is_some_and(|s| s.unreported.is_none())
    })
    .await;
    assert!(cleared, "worker should clear the outcome once acknowledged");
  }

  #[tokio::test]
  async fn test_stale_replay_is_acknowledged_and_ignored() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let ctx = TestContext::new(indexer.clone(), StaticSource::default());
    let worker = TestContext::worker_id(0);

    // the worker was indexing, but the parent has since finished its run
    let worker_state = WorkerState {
      parent_id: Some(TestContext::orchestrator_id()),
      run_id: Some("old-run".to_string()),
      current_item: Some(ItemRef::new("old.md")),
      status: WorkerStatus::Indexing,
      unreported: None,
      assignment: 3,
    };
    save_json(&ctx.store, &worker_key(&worker), &worker_state).await.unwrap();

    let handle = ctx.spawn(1).await;
    let worker_handle = ctx.router.worker(&worker).await.unwrap();

    let settled = wait_for(Duration::from_secs(2), || async {
      worker_handle
        .state()
        .await
        .is_ok_and(|s| s.status == WorkerStatus::Idle && s.unreported.is_none())
    })
    .await;
    assert!(settled);
    assert_eq!(indexer.calls("old.md"), 1);

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.status, RunStatus::Idle);
    assert_eq!(progress.completed, 0);
    assert!(progress.last_run.is_none());
  }

  #[tokio::test]
  async fn test_orchestrator_restarts_from_last_good_state() {
    let (ctx, indexer) = gated(2);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");

    ctx.store.set_failing(true);
    assert!(matches!(handle.pause().await, Err(OrchestratorError::Substrate(_))));
    handle.tx.closed().await;
    assert!(handle.progress().await.is_err());

    ctx.store.set_failing(false);
    let restarted = ctx
      .router
      .orchestrator(&TestContext::orchestrator_id())
      .await
      .expect("router restarts the orchestrator");

    // the pause was never persisted
    let progress = restarted.progress().await.unwrap();
    assert_eq!(progress.status, RunStatus::Running);
    assert_eq!(progress.in_flight, 2);

    indexer.release(2);
    let summary = wait_until_idle(&restarted).await.last_run.expect("summary");
    assert_eq!(summary.completed, 2);
  }

  #[tokio::test]
  async fn test_outcome_redelivered_to_restarted_orchestrator() {
    let (ctx, indexer) = gated(1);
    let handle = ctx.spawn(1).await;
    handle.start().await.expect("start");

    // the worker can still save, but the parent cannot record the outcome
    ctx.store.set_failing_prefix("orchestrator/", true);
    indexer.release(1);
    handle.tx.closed().await;

    ctx.store.set_failing_prefix("orchestrator/", false);
    let restarted = ctx
      .router
      .orchestrator(&TestContext::orchestrator_id())
      .await
      .expect("router restarts the orchestrator");

    let summary = wait_until_idle(&restarted).await.last_run.expect("summary");
    assert_eq!(summary.completed, 1);
    assert_eq!(indexer.total_calls(), 1);
  }

  #[tokio::test]
  async fn test_outcome_redelivered_after_failed_parent_restart() {
    let (ctx, indexer) = gated(1);
    let handle = ctx.spawn(1).await;
    handle.start().await.expect("start");

    // stop the parent, and make its first restart fail to read state
    ctx.store.set_failing_prefix("orchestrator/", true);
    assert!(matches!(handle.pause().await, Err(OrchestratorError::Substrate(_))));
    handle.tx.closed().await;
    ctx.store.set_failing_prefix("orchestrator/", false);
    ctx.store.fail_loads("orchestrator/", 1);

    indexer.release(1);
    let restart_failed = wait_for(Duration::from_secs(2), || async {
      ctx.store.load_failures_left("orchestrator/") == 0
    })
    .await;
    assert!(restart_failed, "worker should have tried to reach its parent");

    let restarted = ctx
      .router
      .orchestrator(&TestContext::orchestrator_id())
      .await
      .expect("router restarts the orchestrator");
    let summary = wait_until_idle(&restarted).await.last_run.expect("summary");
    assert_eq!(summary.completed, 1);
    assert_eq!(indexer.total_calls(), 1);
  }

  #[tokio::test]
  async fn test_scheduler_survives_orchestrator_restart() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let names = items(2);
    let ctx = TestContext::new(indexer.clone(), StaticSource::new(&as_strs(&names)));
    let handle = ctx.spawn(1).await;

    // every scheduled start fails to persist until the store recovers
    ctx.store.set_failing_prefix("orchestrator/", true);
    let scheduler = Scheduler::new(
      ctx.router.clone(),
      TestContext::orchestrator_id(),
      Duration::from_millis(50),
    );
    let task = tokio::spawn(scheduler.run(ctx.cancel.child_token()));

    handle.tx.closed().await;
    ctx.store.set_failing_prefix("orchestrator/", false);

    let finished = wait_for(Duration::from_secs(5), || async {
      match ctx.router.orchestrator(&TestContext::orchestrator_id()).await {
        Some(current) => current
          .progress()
          .await
          .is_ok_and(|p| p.last_run.as_ref().is_some_and(|s| s.completed == 2)),
        None => false,
      }
    })
    .await;
    assert!(finished, "a later tick should start a run on the restarted orchestrator");
    assert!(!task.is_finished());
  }

  #[tokio::test]
  async fn test_state_persisted_after_each_transition() {
    let (ctx, _indexer) = gated(3);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");
    handle.pause().await.expect("pause");

    let stored: OrchestratorState = load_json(&ctx.store, &orchestrator_key(&TestContext::orchestrator_id()))
      .await
      .unwrap()
      .expect("persisted");
    assert_eq!(stored.status, RunStatus::Paused);
    assert_eq!(stored.allocations.len(), 2);
    assert_eq!(stored.pending.len(), 1);
    assert!(stored.check_invariants().is_empty());
  }
}
