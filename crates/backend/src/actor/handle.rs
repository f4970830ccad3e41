//! Actor handles for communicating with actors
//!
//! Handles are cheap to clone and provide a way to send messages to actors.
//! They encapsulate the channel sender and provide convenient methods for
//! request/response patterns.

use tokio::sync::{mpsc, oneshot};

use super::{
  message::{OrchestratorMessage, WorkerMessage},
  orchestrator::{
    OrchestratorError,
    state::{CommandKind, RunProgress},
  },
  worker::{
    WorkerError,
    state::{ItemOutcome, WorkerState},
  },
};
use crate::domain::item::{ItemRef, OrchestratorId, WorkerId};

// ============================================================================
// Orchestrator Handle
// ============================================================================

/// Handle to communicate with an OrchestratorActor
#[derive(Clone, Debug)]
pub struct OrchestratorHandle {
  pub tx: mpsc::Sender<OrchestratorMessage>,
}

impl OrchestratorHandle {
  pub fn new(tx: mpsc::Sender<OrchestratorMessage>) -> Self {
    Self { tx }
  }

  async fn command(&self, command: CommandKind) -> Result<(), OrchestratorError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(OrchestratorMessage::Command { command, reply })
      .await
      .map_err(|_| OrchestratorError::ActorGone)?;
    rx.await.map_err(|_| OrchestratorError::ActorGone)?
  }

  /// Begin a run over the current corpus. Rejected unless idle.
  pub async fn start(&self) -> Result<(), OrchestratorError> {
    self.command(CommandKind::Start).await
  }

  pub async fn pause(&self) -> Result<(), OrchestratorError> {
    self.command(CommandKind::Pause).await
  }

  /// Rejected unless paused
  pub async fn resume(&self) -> Result<(), OrchestratorError> {
    self.command(CommandKind::Resume).await
  }

  pub async fn abort(&self) -> Result<(), OrchestratorError> {
    self.command(CommandKind::Abort).await
  }

  /// One-way; a no-op for items the orchestrator is not tracking
  pub async fn mark_completed(&self, item: ItemRef) -> Result<(), SendError> {
    self.callback(None, None, ItemOutcome::Completed { item }, None).await
  }

  /// One-way; a no-op for items the orchestrator is not tracking
  pub async fn mark_failed(&self, item: ItemRef, reason: impl Into<String>) -> Result<(), SendError> {
    let outcome = ItemOutcome::Failed {
      item,
      reason: reason.into(),
    };
    self.callback(None, None, outcome, None).await
  }

  /// Deliver a worker's outcome and wait until the orchestrator has persisted it
  pub async fn report(
    &self,
    worker: WorkerId,
    run_id: Option<String>,
    outcome: ItemOutcome,
  ) -> Result<(), SendError> {
    let (ack, rx) = oneshot::channel();
    self.callback(Some(worker), run_id, outcome, Some(ack)).await?;
    rx.await.map_err(|_| SendError::ActorGone)
  }

  async fn callback(
    &self,
    worker: Option<WorkerId>,
    run_id: Option<String>,
    outcome: ItemOutcome,
    ack: Option<oneshot::Sender<()>>,
  ) -> Result<(), SendError> {
    self
      .tx
      .send(OrchestratorMessage::Callback {
        worker,
        run_id,
        outcome,
        ack,
      })
      .await
      .map_err(|_| SendError::ActorGone)
  }

  pub async fn progress(&self) -> Result<RunProgress, SendError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(OrchestratorMessage::Progress { reply })
      .await
      .map_err(|_| SendError::ActorGone)?;
    rx.await.map_err(|_| SendError::ActorGone)
  }

  pub async fn shutdown(&self) -> Result<(), SendError> {
    self
      .tx
      .send(OrchestratorMessage::Shutdown)
      .await
      .map_err(|_| SendError::ActorGone)
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

// ============================================================================
// Worker Handle
// ============================================================================

/// Handle to communicate with a WorkerActor
#[derive(Clone, Debug)]
pub struct WorkerHandle {
  pub tx: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
  pub fn new(tx: mpsc::Sender<WorkerMessage>) -> Self {
    Self { tx }
  }

  /// Ask the worker to take on `item`. `Err(Busy)` if it already holds one.
  pub async fn process(
    &self,
    parent: OrchestratorId,
    run_id: Option<String>,
    item: ItemRef,
  ) -> Result<(), WorkerError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerMessage::Process {
        parent,
        run_id,
        item,
        reply,
      })
      .await
      .map_err(|_| WorkerError::ActorGone)?;
    rx.await.map_err(|_| WorkerError::ActorGone)?
  }

  pub async fn state(&self) -> Result<WorkerState, SendError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerMessage::State { reply })
      .await
      .map_err(|_| SendError::ActorGone)?;
    rx.await.map_err(|_| SendError::ActorGone)
  }

  pub(crate) async fn finished(&self, outcome: ItemOutcome) -> Result<(), SendError> {
    self
      .tx
      .send(WorkerMessage::Finished { outcome })
      .await
      .map_err(|_| SendError::ActorGone)
  }

  pub(crate) async fn acknowledged(&self, item: ItemRef, assignment: u64) -> Result<(), SendError> {
    self
      .tx
      .send(WorkerMessage::Acknowledged { item, assignment })
      .await
      .map_err(|_| SendError::ActorGone)
  }

  pub async fn shutdown(&self) -> Result<(), SendError> {
    self.tx.send(WorkerMessage::Shutdown).await.map_err(|_| SendError::ActorGone)
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Error when sending to an actor
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("Actor has shut down")]
  ActorGone,
}
