//! OrchestratorActor - owns one run and fans items out to workers
//!
//! # Responsibilities
//!
//! - Enumerate the corpus on `start` and create the worker identities
//! - Pair the head of the pending queue with the lowest free worker, one
//!   pairing at a time, recording an allocation only once the worker confirms
//! - Account for worker callbacks and refill free workers while running
//! - Pause / resume / abort through the status table in [`state::next_status`]
//!
//! Every transition is persisted before the command is answered. A failed
//! write stops the actor; the router respawns it from the last good state.

pub mod state;

use std::{collections::HashSet, ops::ControlFlow, sync::Arc, time::Duration};

use tokio::{
  sync::{mpsc, oneshot},
  time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::state::{CommandKind, OrchestratorState, RunStatus, next_status};
use super::{
  handle::OrchestratorHandle, message::OrchestratorMessage, router::Router, worker::WorkerError,
  worker::state::ItemOutcome,
};
use crate::{
  domain::item::{OrchestratorId, WorkerId},
  indexing::source::{DocumentSource, SourceError},
  state::{StateError, load_json, orchestrator_key, save_json},
};

/// Wait before allocating again when no worker could take work and none is busy
const ALLOCATION_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  #[error("Cannot {command} while {status}")]
  Validation { command: CommandKind, status: RunStatus },
  #[error("Corpus enumeration failed: {0}")]
  Source(#[from] SourceError),
  #[error("Orchestrator state could not be persisted: {0}")]
  Substrate(#[from] StateError),
  #[error("Orchestrator has shut down")]
  ActorGone,
}

impl From<super::handle::SendError> for OrchestratorError {
  fn from(_: super::handle::SendError) -> Self {
    OrchestratorError::ActorGone
  }
}

/// Configuration for spawning an OrchestratorActor
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
  pub id: OrchestratorId,
  /// Workers created per run
  pub pool_size: usize,
}

pub struct OrchestratorActor {
  config: OrchestratorConfig,
  state: OrchestratorState,
  rx: mpsc::Receiver<OrchestratorMessage>,
  router: Router,
  source: Arc<dyn DocumentSource>,
  cancel: CancellationToken,
  /// Set when a stalled allocation pass should be retried without a callback
  allocation_retry: Option<Instant>,
}

impl OrchestratorActor {
  /// Restore persisted state, then start the actor task.
  ///
  /// The returned handle is usable immediately; the router registers it
  /// before the task begins recovery, so workers can resolve their parent.
  pub(crate) async fn load(
    config: OrchestratorConfig,
    router: Router,
    source: Arc<dyn DocumentSource>,
    cancel: CancellationToken,
  ) -> Result<(Self, OrchestratorHandle), StateError> {
    let state: OrchestratorState = load_json(router.state_store().as_ref(), &orchestrator_key(&config.id))
      .await?
      .unwrap_or_default();

    info!(
      orchestrator = %config.id,
      status = %state.status,
      pending = state.pending.len(),
      in_flight = state.allocations.len(),
      "Orchestrator state restored"
    );

    let (tx, rx) = mpsc::channel(256);
    let actor = Self {
      config,
      state,
      rx,
      router,
      source,
      cancel,
      allocation_retry: None,
    };
    Ok((actor, OrchestratorHandle::new(tx)))
  }

  pub(crate) async fn run(mut self) {
    info!(orchestrator = %self.config.id, "OrchestratorActor started");

    if self.recover().await.is_continue() {
      loop {
        let retry_at = self.allocation_retry;

        tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
            info!(orchestrator = %self.config.id, "OrchestratorActor shutting down (cancelled)");
            break;
          }

          msg = self.rx.recv() => {
            let Some(msg) = msg else {
              info!(orchestrator = %self.config.id, "OrchestratorActor shutting down (channel closed)");
              break;
            };
            if self.handle_message(msg).await.is_break() {
              break;
            }
          }

          _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
            self.allocation_retry = None;
            if self.state.status == RunStatus::Running && self.allocate().await.is_err() {
              break;
            }
          }
        }
      }
    }

    info!(orchestrator = %self.config.id, "OrchestratorActor stopped");
  }

  /// Pick up where the persisted state left off
  async fn recover(&mut self) -> ControlFlow<()> {
    for violation in self.state.check_invariants() {
      error!(orchestrator = %self.config.id, violation, "Restored orchestrator state is inconsistent");
    }

    // in-flight workers replay their items on spawn
    let in_flight: Vec<WorkerId> = self.state.allocations.values().cloned().collect();
    for worker in in_flight {
      if let Err(e) = self.router.worker(&worker).await {
        warn!(orchestrator = %self.config.id, worker = %worker, err = %e, "Failed to respawn worker");
      }
    }

    if self.state.finish_if_drained() {
      self.log_finished();
      if self.persist().await.is_err() {
        return ControlFlow::Break(());
      }
    }

    if self.state.status == RunStatus::Running && self.allocate().await.is_err() {
      return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
  }

  async fn handle_message(&mut self, msg: OrchestratorMessage) -> ControlFlow<()> {
    match msg {
      OrchestratorMessage::Command { command, reply } => {
        let result = self.handle_command(command).await;
        let fatal = matches!(result, Err(OrchestratorError::Substrate(_)));
        let _ = reply.send(result);
        if fatal {
          return ControlFlow::Break(());
        }
      }
      OrchestratorMessage::Callback {
        worker,
        run_id,
        outcome,
        ack,
      } => {
        if self.handle_callback(worker, run_id, outcome, ack).await.is_err() {
          return ControlFlow::Break(());
        }
      }
      OrchestratorMessage::Progress { reply } => {
        let _ = reply.send(self.state.progress());
      }
      OrchestratorMessage::Shutdown => {
        info!(orchestrator = %self.config.id, "OrchestratorActor received shutdown");
        return ControlFlow::Break(());
      }
    }
    ControlFlow::Continue(())
  }

  async fn handle_command(&mut self, command: CommandKind) -> Result<(), OrchestratorError> {
    let current = self.state.status;
    let next = match next_status(current, command) {
      Ok(next) => next,
      Err(e) => {
        warn!(orchestrator = %self.config.id, %command, status = %current, "Command rejected");
        return Err(e);
      }
    };

    if command == CommandKind::Start {
      return self.start_run().await;
    }

    if next == current {
      debug!(orchestrator = %self.config.id, %command, status = %current, "Command acknowledged, nothing to change");
      return Ok(());
    }

    info!(orchestrator = %self.config.id, %command, from = %current, to = %next, "Run status changed");
    self.state.status = next;
    if self.state.finish_if_drained() {
      self.log_finished();
    }
    self.persist().await?;

    if self.state.status == RunStatus::Running {
      self.allocate().await?;
    }
    Ok(())
  }

  async fn start_run(&mut self) -> Result<(), OrchestratorError> {
    let items = match self.source.list().await {
      Ok(items) => items,
      Err(e) => {
        warn!(orchestrator = %self.config.id, err = %e, "Failed to enumerate corpus, run not started");
        return Err(e.into());
      }
    };

    self.state.begin_run(&self.config.id, items, self.config.pool_size);
    info!(
      orchestrator = %self.config.id,
      run_id = ?self.state.run_id,
      items = self.state.initial_count,
      workers = self.state.workers.len(),
      "Run started"
    );

    if self.state.finish_if_drained() {
      self.log_finished();
    }
    self.persist().await?;
    self.allocate().await?;
    Ok(())
  }

  async fn handle_callback(
    &mut self,
    worker: Option<WorkerId>,
    run_id: Option<String>,
    outcome: ItemOutcome,
    ack: Option<oneshot::Sender<()>>,
  ) -> Result<(), OrchestratorError> {
    let item = outcome.item();
    let same_run = run_id.is_none() || run_id == self.state.run_id;

    if same_run && self.state.is_allocated(item, worker.as_ref()) {
      match &outcome {
        ItemOutcome::Completed { .. } => {
          self.state.complete(item);
          debug!(orchestrator = %self.config.id, item = %item, "Item completed");
        }
        ItemOutcome::Failed { reason, .. } => {
          self.state.fail(item);
          warn!(orchestrator = %self.config.id, item = %item, reason, "Item failed");
        }
      }

      if self.state.status == RunStatus::Aborting && self.state.finish_if_drained() {
        self.log_finished();
      }
      if let Err(e) = self.persist().await {
        // no ack: the worker keeps the outcome and re-sends it
        return Err(e.into());
      }
    } else {
      debug!(
        orchestrator = %self.config.id,
        item = %item,
        worker = ?worker,
        run_id = ?run_id,
        "Callback for untracked item ignored"
      );
    }

    if let Some(ack) = ack {
      let _ = ack.send(());
    }

    if self.state.status == RunStatus::Running {
      self.allocate().await?;
    }
    Ok(())
  }

  /// Dispatch pending items to free workers until one side runs out
  async fn allocate(&mut self) -> Result<(), OrchestratorError> {
    self.allocation_retry = None;
    let mut unavailable: HashSet<WorkerId> = HashSet::new();

    while let Some((item, worker)) = self.state.next_assignment(&unavailable) {
      let handle = match self.router.worker(&worker).await {
        Ok(handle) => handle,
        Err(e) => {
          warn!(orchestrator = %self.config.id, worker = %worker, err = %e, "Worker unavailable");
          unavailable.insert(worker);
          continue;
        }
      };

      match handle
        .process(self.config.id.clone(), self.state.run_id.clone(), item.clone())
        .await
      {
        Ok(()) => {
          self.state.assign(&item, &worker);
          debug!(orchestrator = %self.config.id, item = %item, worker = %worker, "Item allocated");
          self.persist().await?;
        }
        Err(WorkerError::Busy { .. }) => {
          debug!(orchestrator = %self.config.id, worker = %worker, "Worker busy, skipping");
          unavailable.insert(worker);
        }
        Err(e) => {
          warn!(orchestrator = %self.config.id, worker = %worker, err = %e, "Dispatch failed, skipping worker");
          unavailable.insert(worker);
        }
      }
    }

    // no callback is coming to wake us, so try again on a timer
    if !unavailable.is_empty() && !self.state.pending.is_empty() && self.state.allocations.is_empty() {
      let mut workers: Vec<&WorkerId> = unavailable.iter().collect();
      workers.sort();
      error!(
        orchestrator = %self.config.id,
        pending = self.state.pending.len(),
        workers = ?workers,
        retry_ms = ALLOCATION_RETRY_DELAY.as_millis() as u64,
        "No worker accepted work, retrying allocation"
      );
      self.allocation_retry = Some(Instant::now() + ALLOCATION_RETRY_DELAY);
    }

    if self.state.finish_if_drained() {
      self.log_finished();
      self.persist().await?;
    }
    Ok(())
  }

  fn log_finished(&self) {
    if let Some(summary) = &self.state.last_run {
      info!(
        orchestrator = %self.config.id,
        run_id = ?summary.run_id,
        items = summary.initial_count,
        completed = summary.completed,
        failed = summary.failed.len(),
        skipped = summary.skipped,
        aborted = summary.aborted,
        "Run finished"
      );
    }
  }

  async fn persist(&self) -> Result<(), StateError> {
    for violation in self.state.check_invariants() {
      error!(orchestrator = %self.config.id, violation, "Orchestrator invariant violated");
    }

    match save_json(
      self.router.state_store().as_ref(),
      &orchestrator_key(&self.config.id),
      &self.state,
    )
    .await
    {
      Ok(()) => Ok(()),
      Err(e) => {
        error!(orchestrator = %self.config.id, err = %e, "Failed to persist orchestrator state, stopping");
        Err(e)
      }
    }
  }
}
