//! Orchestrator E2E tests: allocation, callbacks, and run control.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{
        HangingIndexer, ScriptedIndexer, StaticSource, TestContext, as_strs, fast_retry, items, wait_for_progress,
        wait_until_idle,
      },
      orchestrator::{
        OrchestratorError,
        state::{CommandKind, RunStatus},
      },
      retry::RetryPolicy,
    },
    domain::item::ItemRef,
  };

  fn gated(n: usize) -> (TestContext, Arc<ScriptedIndexer>) {
    let indexer = Arc::new(ScriptedIndexer::gated());
    let names = items(n);
    let ctx = TestContext::new(indexer.clone(), StaticSource::new(&as_strs(&names)));
    (ctx, indexer)
  }

  // ==========================================================================
  // Allocation
  // ==========================================================================

  #[tokio::test]
  async fn test_start_with_more_workers_than_items() {
    let (ctx, _indexer) = gated(3);
    let handle = ctx.spawn(10).await;

    handle.start().await.expect("start");
    let progress = handle.progress().await.unwrap();

    assert_eq!(progress.status, RunStatus::Running);
    assert_eq!(progress.in_flight, 3);
    assert_eq!(progress.free_workers, 7);
    assert_eq!(progress.pending, 0);
    assert_eq!(progress.initial_count, 3);
  }

  #[tokio::test]
  async fn test_start_with_more_items_than_workers() {
    let (ctx, _indexer) = gated(12);
    let handle = ctx.spawn(5).await;

    handle.start().await.expect("start");
    let progress = handle.progress().await.unwrap();

    assert_eq!(progress.status, RunStatus::Running);
    assert_eq!(progress.in_flight, 5);
    assert_eq!(progress.free_workers, 0);
    assert_eq!(progress.pending, 7);
  }

  #[tokio::test]
  async fn test_completion_refills_freed_worker() {
    let (ctx, indexer) = gated(3);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");

    indexer.release(1);
    let progress = wait_for_progress(&handle, |p| p.completed == 1)
      .await
      .expect("one item should complete");

    assert_eq!(progress.pending, 0);
    assert_eq!(progress.in_flight, 2);
    assert_eq!(progress.free_workers, 0);
  }

  #[tokio::test]
  async fn test_run_completes_and_resets() {
    let (ctx, indexer) = gated(5);
    indexer.fail_permanently("doc-03.md");
    indexer.release(100);
    let handle = ctx.spawn(2).await;

    handle.start().await.expect("start");
    let progress = wait_until_idle(&handle).await;

    assert_eq!(progress.in_flight, 0);
    assert_eq!(progress.pending, 0);
    assert_eq!(progress.free_workers, 0);
    assert!(progress.run_id.is_none());

    let summary = progress.last_run.expect("summary");
    assert_eq!(summary.initial_count, 5);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, vec![ItemRef::new("doc-03.md")]);
    assert_eq!(summary.skipped, 0);
    assert!(!summary.aborted);
    assert_eq!(indexer.total_calls(), 5);
  }

  #[tokio::test]
  async fn test_empty_corpus_finishes_immediately() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let ctx = TestContext::new(indexer, StaticSource::new(&[]));
    let handle = ctx.spawn(4).await;

    handle.start().await.expect("start");
    let progress = handle.progress().await.unwrap();

    assert_eq!(progress.status, RunStatus::Idle);
    assert_eq!(progress.last_run.map(|s| s.initial_count), Some(0));
  }

  #[tokio::test]
  async fn test_duplicate_items_enumerated_once() {
    let indexer = Arc::new(ScriptedIndexer::gated());
    let ctx = TestContext::new(indexer, StaticSource::new(&["a.md", "b.md", "a.md"]));
    let handle = ctx.spawn(4).await;

    handle.start().await.expect("start");
    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.initial_count, 2);
    assert_eq!(progress.in_flight, 2);
  }

  #[tokio::test]
  async fn test_accounting_holds_throughout_run() {
    let (ctx, indexer) = gated(20);
    indexer.fail_permanently("doc-07.md");
    let handle = ctx.spawn(3).await;
    handle.start().await.expect("start");

    for _ in 0..20 {
      let p = handle.progress().await.unwrap();
      if p.status == RunStatus::Idle {
        break;
      }
      assert_eq!(p.completed + p.failed.len() + p.in_flight + p.pending, p.initial_count);
      assert_eq!(p.in_flight + p.free_workers, 3);
      indexer.release(1);
      tokio::time::sleep(Duration::from_millis(5)).await;
    }

    indexer.release(100);
    let progress = wait_until_idle(&handle).await;
    let summary = progress.last_run.expect("summary");
    assert_eq!(summary.completed + summary.failed.len(), 20);
  }

  // ==========================================================================
  // Commands
  // ==========================================================================

  #[tokio::test]
  async fn test_start_rejected_while_running() {
    let (ctx, _indexer) = gated(4);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");
    let before = handle.progress().await.unwrap();

    let err = handle.start().await.expect_err("second start should fail");
    assert!(matches!(
      err,
      OrchestratorError::Validation {
        command: CommandKind::Start,
        status: RunStatus::Running
      }
    ));

    let after = handle.progress().await.unwrap();
    assert_eq!(after.run_id, before.run_id);
    assert_eq!(after.in_flight, before.in_flight);
  }

  #[tokio::test]
  async fn test_resume_rejected_unless_paused() {
    let (ctx, _indexer) = gated(2);
    let handle = ctx.spawn(2).await;

    assert!(matches!(
      handle.resume().await,
      Err(OrchestratorError::Validation { status: RunStatus::Idle, .. })
    ));
    handle.start().await.expect("start");
    assert!(matches!(
      handle.resume().await,
      Err(OrchestratorError::Validation { status: RunStatus::Running, .. })
    ));
  }

  #[tokio::test]
  async fn test_pause_and_abort_from_idle_are_noops() {
    let (ctx, _indexer) = gated(2);
    let handle = ctx.spawn(2).await;

    handle.pause().await.expect("pause from idle");
    handle.abort().await.expect("abort from idle");

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.status, RunStatus::Idle);
    assert!(progress.last_run.is_none());
  }

  #[tokio::test]
  async fn test_pause_stops_allocation_until_resume() {
    let (ctx, indexer) = gated(4);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");

    handle.pause().await.expect("pause");
    handle.pause().await.expect("pause is idempotent");

    indexer.release(2);
    let paused = wait_for_progress(&handle, |p| p.completed == 2)
      .await
      .expect("in-flight items drain while paused");
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.in_flight, 0);
    assert_eq!(paused.pending, 2);
    assert_eq!(paused.free_workers, 2);

    handle.resume().await.expect("resume");
    let resumed = handle.progress().await.unwrap();
    assert_eq!(resumed.status, RunStatus::Running);
    assert_eq!(resumed.in_flight, 2);
    assert_eq!(resumed.pending, 0);

    indexer.release(2);
    let done = wait_until_idle(&handle).await;
    assert_eq!(done.last_run.map(|s| s.completed), Some(4));
  }

  #[tokio::test]
  async fn test_resume_of_drained_pause_finishes_run() {
    let (ctx, indexer) = gated(2);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");
    handle.pause().await.expect("pause");

    indexer.release(2);
    wait_for_progress(&handle, |p| p.completed == 2).await.expect("drained");
    assert_eq!(handle.progress().await.unwrap().status, RunStatus::Paused);

    handle.resume().await.expect("resume");
    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.status, RunStatus::Idle);
    assert_eq!(progress.last_run.map(|s| s.completed), Some(2));
  }

  #[tokio::test]
  async fn test_abort_drains_in_flight_without_new_allocations() {
    let (ctx, indexer) = gated(4);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");

    handle.abort().await.expect("abort");
    let aborting = handle.progress().await.unwrap();
    assert_eq!(aborting.status, RunStatus::Aborting);
    assert_eq!(aborting.in_flight, 2);

    handle.pause().await.expect("pause while aborting is acknowledged");
    assert_eq!(handle.progress().await.unwrap().status, RunStatus::Aborting);

    indexer.release(10);
    let done = wait_until_idle(&handle).await;
    let summary = done.last_run.expect("summary");
    assert!(summary.aborted);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(indexer.total_calls(), 2);
  }

  #[tokio::test]
  async fn test_abort_with_nothing_in_flight_finishes_at_once() {
    let (ctx, indexer) = gated(3);
    let handle = ctx.spawn(1).await;
    handle.start().await.expect("start");
    handle.pause().await.expect("pause");
    indexer.release(1);
    wait_for_progress(&handle, |p| p.in_flight == 0).await.expect("drained");

    handle.abort().await.expect("abort");
    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.status, RunStatus::Idle);
    let summary = progress.last_run.expect("summary");
    assert!(summary.aborted);
    assert_eq!(summary.skipped, 2);
  }

  #[tokio::test]
  async fn test_stalled_allocation_retried_without_callback() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let names = items(2);
    let ctx = TestContext::new(indexer.clone(), StaticSource::new(&as_strs(&names)));
    let handle = ctx.spawn(1).await;

    // the only worker cannot be brought up on the first pass
    ctx.store.fail_loads("worker/", 1);
    handle.start().await.expect("start");

    let stalled = handle.progress().await.unwrap();
    assert_eq!(stalled.status, RunStatus::Running);
    assert_eq!(stalled.in_flight, 0);
    assert_eq!(stalled.pending, 2);

    let summary = wait_until_idle(&handle).await.last_run.expect("summary");
    assert_eq!(summary.completed, 2);
    assert_eq!(indexer.total_calls(), 2);
  }

  #[tokio::test]
  async fn test_enumeration_failure_leaves_idle() {
    let (ctx, _indexer) = gated(3);
    ctx.source.set_failing(true);
    let handle = ctx.spawn(2).await;

    assert!(matches!(handle.start().await, Err(OrchestratorError::Source(_))));
    assert_eq!(handle.progress().await.unwrap().status, RunStatus::Idle);

    ctx.source.set_failing(false);
    handle.start().await.expect("start after source recovers");
  }

  #[tokio::test]
  async fn test_second_run_sees_new_corpus() {
    let indexer = Arc::new(ScriptedIndexer::default());
    let ctx = TestContext::new(indexer.clone(), StaticSource::new(&["a.md"]));
    let handle = ctx.spawn(2).await;

    handle.start().await.expect("first run");
    let first = wait_until_idle(&handle).await.last_run.expect("summary");

    ctx.source.set_items(&["a.md", "b.md", "c.md"]);
    handle.start().await.expect("second run");
    let second = wait_for_progress(&handle, |p| {
      p.status == RunStatus::Idle && p.last_run.as_ref().is_some_and(|s| s.run_id != first.run_id)
    })
    .await
    .expect("second run finishes");

    assert_eq!(second.last_run.map(|s| s.completed), Some(3));
    assert_eq!(indexer.calls("a.md"), 2);
  }

  // ==========================================================================
  // Callbacks
  // ==========================================================================

  #[tokio::test]
  async fn test_callback_for_unknown_item_is_ignored() {
    let (ctx, _indexer) = gated(3);
    let handle = ctx.spawn(2).await;
    handle.start().await.expect("start");
    let before = handle.progress().await.unwrap();

    handle.mark_completed(ItemRef::new("never-seen.md")).await.unwrap();
    handle.mark_failed(ItemRef::new("doc-02.md"), "still pending").await.unwrap();

    let after = handle.progress().await.unwrap();
    assert_eq!(after.completed, before.completed);
    assert_eq!(after.failed, before.failed);
    assert_eq!(after.pending, before.pending);
    assert_eq!(after.in_flight, before.in_flight);
  }

  #[tokio::test]
  async fn test_external_failure_is_counted_once() {
    let (ctx, indexer) = gated(1);
    let handle = ctx.spawn(1).await;
    handle.start().await.expect("start");
    handle.pause().await.expect("pause");

    let item = ItemRef::new("doc-00.md");
    handle.mark_failed(item.clone(), "operator gave up").await.unwrap();
    handle.mark_failed(item.clone(), "duplicate").await.unwrap();

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.failed, vec![item]);
    assert_eq!(progress.in_flight, 0);

    // the worker's own late report changes nothing
    indexer.release(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = handle.progress().await.unwrap();
    assert_eq!(later.completed, 0);
    assert_eq!(later.failed.len(), 1);
  }

  // ==========================================================================
  // Retry
  // ==========================================================================

  #[tokio::test]
  async fn test_transient_failures_are_retried() {
    let indexer = Arc::new(ScriptedIndexer::default());
    indexer.fail_transiently("a.md", 2);
    let ctx = TestContext::new(indexer.clone(), StaticSource::new(&["a.md"]));
    let handle = ctx.spawn(1).await;

    handle.start().await.expect("start");
    let summary = wait_until_idle(&handle).await.last_run.expect("summary");

    assert_eq!(summary.completed, 1);
    assert_eq!(indexer.calls("a.md"), 3);
  }

  #[tokio::test]
  async fn test_exhausted_retries_fail_item() {
    let indexer = Arc::new(ScriptedIndexer::default());
    indexer.fail_transiently("a.md", 10);
    let ctx = TestContext::new(indexer.clone(), StaticSource::new(&["a.md", "b.md"]));
    let handle = ctx.spawn(1).await;

    handle.start().await.expect("start");
    let summary = wait_until_idle(&handle).await.last_run.expect("summary");

    assert_eq!(summary.failed, vec![ItemRef::new("a.md")]);
    assert_eq!(summary.completed, 1);
    assert_eq!(indexer.calls("a.md"), fast_retry().max_attempts as usize);
  }

  #[tokio::test]
  async fn test_hung_step_times_out_and_fails() {
    let retry = RetryPolicy {
      max_attempts: 2,
      step_timeout: Duration::from_millis(20),
      ..fast_retry()
    };
    let ctx = TestContext::with_retry(Arc::new(HangingIndexer), StaticSource::new(&["a.md"]), retry);
    let handle = ctx.spawn(1).await;

    handle.start().await.expect("start");
    let summary = wait_until_idle(&handle).await.last_run.expect("summary");
    assert_eq!(summary.failed, vec![ItemRef::new("a.md")]);
  }
}
