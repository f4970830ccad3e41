use serde::{Deserialize, Serialize};

use crate::domain::item::{ItemRef, OrchestratorId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
  #[default]
  Idle,
  Indexing,
}

/// Terminal result of one accepted item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
  Completed { item: ItemRef },
  Failed { item: ItemRef, reason: String },
}

impl ItemOutcome {
  pub fn item(&self) -> &ItemRef {
    match self {
      ItemOutcome::Completed { item } | ItemOutcome::Failed { item, .. } => item,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, ItemOutcome::Completed { .. })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
  /// Owning orchestrator, fixed at first assignment
  pub parent_id: Option<OrchestratorId>,
  /// Parent's run the current item belongs to
  #[serde(default)]
  pub run_id: Option<String>,
  /// Item in progress, or the last one processed while idle
  pub current_item: Option<ItemRef>,
  pub status: WorkerStatus,
  /// Outcome not yet acknowledged by the parent
  #[serde(default)]
  pub unreported: Option<ItemOutcome>,
  /// Bumped on every accepted item, so an acknowledgement from an earlier
  /// assignment of the same item cannot clear a newer outcome
  #[serde(default)]
  pub assignment: u64,
}

impl WorkerState {
  pub fn is_busy(&self) -> bool {
    self.status == WorkerStatus::Indexing
  }

  /// Take on `item`. The caller has already checked the worker is idle.
  pub fn begin(&mut self, parent: &OrchestratorId, item: ItemRef) {
    if self.parent_id.is_none() {
      self.parent_id = Some(parent.clone());
    }
    self.current_item = Some(item);
    self.status = WorkerStatus::Indexing;
    self.unreported = None;
    self.assignment += 1;
  }

  /// Record the outcome for the item in progress.
  ///
  /// Returns false when the outcome does not belong to the current item
  /// (a stale step from before a restart).
  pub fn finish(&mut self, outcome: &ItemOutcome) -> bool {
    if !self.is_busy() || self.current_item.as_ref() != Some(outcome.item()) {
      return false;
    }
    self.status = WorkerStatus::Idle;
    self.unreported = Some(outcome.clone());
    true
  }

  /// Clear the pending outcome once the parent confirmed `item`
  pub fn acknowledge(&mut self, item: &ItemRef, assignment: u64) -> bool {
    if assignment == self.assignment && self.unreported.as_ref().is_some_and(|o| o.item() == item) {
      self.unreported = None;
      return true;
    }
    false
  }

  pub fn check_invariants(&self) -> Vec<String> {
    let mut violations = Vec::new();
    if self.is_busy() && self.current_item.is_none() {
      violations.push("indexing without a current item".to_string());
    }
    violations
  }
}
