//! Actor message types
//!
//! Each request that expects an answer carries a `oneshot::Sender` for the
//! reply. Callbacks from workers carry an optional ack channel that the
//! orchestrator fires once the outcome is persisted.

use tokio::sync::oneshot;

use super::{
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
// Orchestrator Messages
// ============================================================================

#[derive(Debug)]
pub enum OrchestratorMessage {
  /// start / pause / resume / abort
  Command {
    command: CommandKind,
    reply: oneshot::Sender<Result<(), OrchestratorError>>,
  },
  /// Terminal outcome of an allocated item.
  ///
  /// `worker` and `run_id` are set when the callback comes from a worker, so
  /// an outcome left over from an earlier assignment is not misattributed.
  Callback {
    worker: Option<WorkerId>,
    run_id: Option<String>,
    outcome: ItemOutcome,
    ack: Option<oneshot::Sender<()>>,
  },
  /// Read-only progress query
  Progress { reply: oneshot::Sender<RunProgress> },
  /// Stop the actor (state stays persisted)
  Shutdown,
}

// ============================================================================
// Worker Messages
// ============================================================================

#[derive(Debug)]
pub enum WorkerMessage {
  /// Take on one item
  Process {
    parent: OrchestratorId,
    run_id: Option<String>,
    item: ItemRef,
    reply: oneshot::Sender<Result<(), WorkerError>>,
  },
  /// The indexing step for the current item ended
  Finished { outcome: ItemOutcome },
  /// The parent persisted the outcome for `item` from `assignment`
  Acknowledged { item: ItemRef, assignment: u64 },
  /// Read-only state query
  State { reply: oneshot::Sender<WorkerState> },
  /// Stop the actor (state stays persisted)
  Shutdown,
}
