//! WorkerActor - single-slot durable worker
//!
//! A worker holds at most one item. Accepting an item is persisted before
//! it is acknowledged, so a restart finds the worker still `Indexing` and
//! replays the step. The terminal outcome is persisted as `unreported` and
//! delivered to the parent from a separate task that retries until the
//! parent confirms. Only then is it cleared; a restart re-sends it.
//!
//! The step itself runs in its own task under the [`RetryPolicy`], so the
//! mailbox stays responsive (a second `process` is answered with `Busy`
//! while indexing).
//!
//! [`RetryPolicy`]: crate::actor::retry::RetryPolicy

pub mod state;

use std::{ops::ControlFlow, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::state::{ItemOutcome, WorkerState};
use super::{handle::WorkerHandle, message::WorkerMessage, router::Router};
use crate::{
  domain::item::{ItemRef, OrchestratorId, WorkerId},
  state::{StateError, load_json, save_json, worker_key},
};

/// Pause between attempts to deliver an outcome the parent did not confirm
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  #[error("Worker {worker} is busy with {item:?}")]
  Busy { worker: WorkerId, item: Option<ItemRef> },
  #[error("Worker state could not be persisted: {0}")]
  Substrate(#[from] StateError),
  #[error("Worker has shut down")]
  ActorGone,
}

pub struct WorkerActor {
  id: WorkerId,
  state: WorkerState,
  rx: mpsc::Receiver<WorkerMessage>,
  /// Own handle, given to the step and notify tasks
  handle: WorkerHandle,
  router: Router,
  cancel: CancellationToken,
}

impl WorkerActor {
  /// Restore persisted state and start the actor task
  pub async fn spawn(id: WorkerId, router: Router, cancel: CancellationToken) -> Result<WorkerHandle, StateError> {
    let state: WorkerState = load_json(router.state_store().as_ref(), &worker_key(&id))
      .await?
      .unwrap_or_default();

    let (tx, rx) = mpsc::channel(256);
    let handle = WorkerHandle::new(tx);

    let actor = Self {
      id,
      state,
      rx,
      handle: handle.clone(),
      router,
      cancel,
    };
    tokio::spawn(actor.run());

    Ok(handle)
  }

  async fn run(mut self) {
    debug!(worker = %self.id, status = ?self.state.status, "WorkerActor started");

    if self.recover().await.is_continue() {
      loop {
        tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
            debug!(worker = %self.id, "WorkerActor shutting down (cancelled)");
            break;
          }

          msg = self.rx.recv() => {
            let Some(msg) = msg else {
              debug!(worker = %self.id, "WorkerActor shutting down (channel closed)");
              break;
            };
            if self.handle_message(msg).await.is_break() {
              break;
            }
          }
        }
      }
    }

    debug!(worker = %self.id, "WorkerActor stopped");
  }

  /// Resume whatever the persisted state says was in progress
  async fn recover(&mut self) -> ControlFlow<()> {
    for violation in self.state.check_invariants() {
      error!(worker = %self.id, violation, "Restored worker state is inconsistent");
    }

    if self.state.is_busy() {
      match self.state.current_item.clone() {
        Some(item) => {
          info!(worker = %self.id, item = %item, "Replaying in-flight item");
          self.start_step(item);
        }
        None => {
          self.state.status = state::WorkerStatus::Idle;
          return self.persist().await.map_or(ControlFlow::Break(()), |_| ControlFlow::Continue(()));
        }
      }
    } else if let Some(outcome) = self.state.unreported.clone() {
      info!(worker = %self.id, item = %outcome.item(), "Re-sending unacknowledged outcome");
      self.report(outcome);
    }

    ControlFlow::Continue(())
  }

  async fn handle_message(&mut self, msg: WorkerMessage) -> ControlFlow<()> {
    match msg {
      WorkerMessage::Process {
        parent,
        run_id,
        item,
        reply,
      } => {
        let result = self.handle_process(parent, run_id, item).await;
        let fatal = matches!(result, Err(WorkerError::Substrate(_)));
        let _ = reply.send(result);
        if fatal {
          return ControlFlow::Break(());
        }
      }
      WorkerMessage::Finished { outcome } => {
        if !self.state.finish(&outcome) {
          debug!(worker = %self.id, item = %outcome.item(), "Ignoring outcome for an item no longer in progress");
          return ControlFlow::Continue(());
        }
        if outcome.is_success() {
          debug!(worker = %self.id, item = %outcome.item(), "Item completed");
        } else {
          warn!(worker = %self.id, item = %outcome.item(), "Item failed");
        }
        if self.persist().await.is_err() {
          return ControlFlow::Break(());
        }
        self.report(outcome);
      }
      WorkerMessage::Acknowledged { item, assignment } => {
        if self.state.acknowledge(&item, assignment) && self.persist().await.is_err() {
          return ControlFlow::Break(());
        }
      }
      WorkerMessage::State { reply } => {
        let _ = reply.send(self.state.clone());
      }
      WorkerMessage::Shutdown => {
        debug!(worker = %self.id, "WorkerActor received shutdown");
        return ControlFlow::Break(());
      }
    }
    ControlFlow::Continue(())
  }

  async fn handle_process(
    &mut self,
    parent: OrchestratorId,
    run_id: Option<String>,
    item: ItemRef,
  ) -> Result<(), WorkerError> {
    if self.state.is_busy() {
      warn!(
        worker = %self.id,
        requested = %item,
        current = ?self.state.current_item,
        "Rejecting item, worker busy"
      );
      return Err(WorkerError::Busy {
        worker: self.id.clone(),
        item: self.state.current_item.clone(),
      });
    }

    if let Some(existing) = &self.state.parent_id
      && existing != &parent
    {
      warn!(worker = %self.id, parent = %existing, requested_by = %parent, "Item from a different orchestrator");
    }
    if let Some(dropped) = &self.state.unreported {
      // the parent only dispatches to workers it has released
      debug!(worker = %self.id, item = %dropped.item(), "Dropping outcome superseded by new assignment");
    }

    self.state.begin(&parent, item.clone());
    self.state.run_id = run_id;
    self.persist().await?;

    debug!(worker = %self.id, item = %item, "Item accepted");
    self.start_step(item);
    Ok(())
  }

  /// Run the indexing step for `item` in its own task
  fn start_step(&self, item: ItemRef) {
    let indexer = self.router.indexer();
    let retry = self.router.retry_policy();
    let handle = self.handle.clone();
    let cancel = self.cancel.child_token();
    let worker = self.id.clone();

    tokio::spawn(async move {
      let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          debug!(worker = %worker, item = %item, "Indexing step cancelled, will replay on restart");
          return;
        }
        result = retry.run(item.as_str(), || indexer.index(&item)) => result,
      };

      let outcome = match result {
        Ok(_) => ItemOutcome::Completed { item },
        Err(e) => ItemOutcome::Failed {
          item,
          reason: e.to_string(),
        },
      };
      if handle.finished(outcome).await.is_err() {
        debug!(worker = %worker, "Worker gone before step finished");
      }
    });
  }

  /// Deliver `outcome` to the parent; on confirmation tell ourselves to clear it
  fn report(&self, outcome: ItemOutcome) {
    let Some(parent) = self.state.parent_id.clone() else {
      error!(worker = %self.id, "Outcome without a parent, cannot report");
      return;
    };
    let assignment = self.state.assignment;
    let run_id = self.state.run_id.clone();
    let router = self.router.clone();
    let handle = self.handle.clone();
    let cancel = self.cancel.clone();
    let worker = self.id.clone();

    tokio::spawn(async move {
      let item = outcome.item().clone();

      // the router restarts a stopped parent, so each attempt resolves it again
      for attempt in 1u64.. {
        match router.orchestrator(&parent).await {
          Some(orchestrator) => tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = orchestrator.report(worker.clone(), run_id.clone(), outcome.clone()) => match result {
              Ok(()) => {
                let _ = handle.acknowledged(item, assignment).await;
                return;
              }
              Err(e) => warn!(worker = %worker, parent = %parent, attempt, err = %e, "Outcome not delivered, retrying"),
            }
          },
          None if attempt == 1 => {
            warn!(worker = %worker, parent = %parent, "Parent not running, outcome kept for redelivery");
          }
          None => debug!(worker = %worker, parent = %parent, attempt, "Parent still not running"),
        }

        tokio::select! {
          _ = cancel.cancelled() => return,
          _ = tokio::time::sleep(REDELIVERY_DELAY) => {}
        }
      }
    });
  }

  async fn persist(&self) -> Result<(), StateError> {
    match save_json(self.router.state_store().as_ref(), &worker_key(&self.id), &self.state).await {
      Ok(()) => Ok(()),
      Err(e) => {
        error!(worker = %self.id, err = %e, "Failed to persist worker state, stopping");
        Err(e)
      }
    }
  }
}
