//! Pure run-state of an orchestrator.
//!
//! Nothing in here does I/O. The actor in `super` drives these transitions,
//! persists the result after each one, and talks to workers.

use std::{
  collections::{BTreeMap, HashSet, VecDeque},
  fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OrchestratorError;
use crate::domain::item::{ItemRef, OrchestratorId, WorkerId};

// ============================================================================
// Status table
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  #[default]
  Idle,
  Running,
  Paused,
  Aborting,
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      RunStatus::Idle => "idle",
      RunStatus::Running => "running",
      RunStatus::Paused => "paused",
      RunStatus::Aborting => "aborting",
    };
    f.write_str(s)
  }
}

/// Control commands that can change the run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
  Start,
  Pause,
  Resume,
  Abort,
}

impl fmt::Display for CommandKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      CommandKind::Start => "start",
      CommandKind::Pause => "pause",
      CommandKind::Resume => "resume",
      CommandKind::Abort => "abort",
    };
    f.write_str(s)
  }
}

/// The single source of truth for status changes.
///
/// Evaluated before any mutation; a rejected command leaves state untouched.
/// Returning the current status means the command is acknowledged as a no-op.
pub fn next_status(status: RunStatus, command: CommandKind) -> Result<RunStatus, OrchestratorError> {
  use CommandKind as C;
  use RunStatus as S;

  match (status, command) {
    (S::Idle, C::Start) => Ok(S::Running),

    (S::Running, C::Pause) | (S::Paused, C::Pause) => Ok(S::Paused),
    (S::Idle, C::Pause) => Ok(S::Idle),
    // draining continues
    (S::Aborting, C::Pause) => Ok(S::Aborting),

    (S::Paused, C::Resume) => Ok(S::Running),

    (S::Running, C::Abort) | (S::Paused, C::Abort) | (S::Aborting, C::Abort) => Ok(S::Aborting),
    (S::Idle, C::Abort) => Ok(S::Idle),

    (status, command) => Err(OrchestratorError::Validation { command, status }),
  }
}

// ============================================================================
// Run summary / progress
// ============================================================================

/// Outcome of the most recent run, kept after the state resets to idle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
  pub run_id: Option<String>,
  pub initial_count: usize,
  pub completed: usize,
  pub failed: Vec<ItemRef>,
  /// Items never attempted because the run was aborted
  pub skipped: usize,
  pub aborted: bool,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: DateTime<Utc>,
}

/// Read-only snapshot for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
  pub status: RunStatus,
  pub run_id: Option<String>,
  pub initial_count: usize,
  pub completed: usize,
  pub failed: Vec<ItemRef>,
  pub in_flight: usize,
  pub pending: usize,
  pub free_workers: usize,
  pub last_run: Option<RunSummary>,
}

impl RunProgress {
  /// Items that reached a terminal outcome
  pub fn processed(&self) -> usize {
    self.completed + self.failed.len()
  }

  /// Calculate completion percentage
  pub fn percent(&self) -> u8 {
    if self.initial_count == 0 {
      100
    } else {
      ((self.processed() as f64 / self.initial_count as f64) * 100.0).min(100.0) as u8
    }
  }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorState {
  pub status: RunStatus,
  #[serde(default)]
  pub run_id: Option<String>,
  #[serde(default)]
  pub started_at: Option<DateTime<Utc>>,
  pub initial_count: usize,
  pub pending: VecDeque<ItemRef>,
  pub allocations: BTreeMap<ItemRef, WorkerId>,
  /// Worker identities in creation order, fixed at start
  #[serde(default)]
  pub workers: Vec<WorkerId>,
  pub free_workers: Vec<WorkerId>,
  pub failed: Vec<ItemRef>,
  pub completed: usize,
  #[serde(default)]
  pub last_run: Option<RunSummary>,
}

impl OrchestratorState {
  /// Populate a fresh run. Status must already have been validated as `Idle`.
  ///
  /// Duplicate items keep their first position.
  pub fn begin_run(&mut self, owner: &OrchestratorId, items: Vec<ItemRef>, pool_size: usize) {
    let mut seen = HashSet::with_capacity(items.len());
    let pending: VecDeque<ItemRef> = items.into_iter().filter(|item| seen.insert(item.clone())).collect();
    let workers: Vec<WorkerId> = (0..pool_size.max(1)).map(|i| WorkerId::for_pool(owner, i)).collect();

    *self = OrchestratorState {
      status: RunStatus::Running,
      run_id: Some(uuid::Uuid::now_v7().to_string()),
      started_at: Some(Utc::now()),
      initial_count: pending.len(),
      pending,
      allocations: BTreeMap::new(),
      free_workers: workers.clone(),
      workers,
      failed: Vec::new(),
      completed: 0,
      last_run: self.last_run.take(),
    };
  }

  /// Next (item, worker) pairing, or `None` if not running or either side is
  /// exhausted. Workers in `unavailable` are passed over; the item stays at
  /// the head of the queue.
  pub fn next_assignment(&self, unavailable: &HashSet<WorkerId>) -> Option<(ItemRef, WorkerId)> {
    if self.status != RunStatus::Running {
      return None;
    }
    let item = self.pending.front()?;
    let worker = self
      .workers
      .iter()
      .chain(self.free_workers.iter().filter(|w| !self.workers.contains(w)))
      .find(|w| self.free_workers.contains(w) && !unavailable.contains(*w))?;
    Some((item.clone(), worker.clone()))
  }

  /// Record a confirmed dispatch
  pub fn assign(&mut self, item: &ItemRef, worker: &WorkerId) {
    if let Some(pos) = self.pending.iter().position(|p| p == item) {
      self.pending.remove(pos);
    }
    self.free_workers.retain(|w| w != worker);
    self.allocations.insert(item.clone(), worker.clone());
  }

  /// Whether `item` is currently allocated (to `worker`, when given)
  pub fn is_allocated(&self, item: &ItemRef, worker: Option<&WorkerId>) -> bool {
    match (self.allocations.get(item), worker) {
      (Some(owner), Some(worker)) => owner == worker,
      (Some(_), None) => true,
      (None, _) => false,
    }
  }

  fn release(&mut self, item: &ItemRef) -> bool {
    let Some(worker) = self.allocations.remove(item) else {
      return false;
    };
    if !self.free_workers.contains(&worker) {
      self.free_workers.push(worker);
    }
    true
  }

  /// Returns false (and changes nothing) for an item that is not allocated
  pub fn complete(&mut self, item: &ItemRef) -> bool {
    if !self.release(item) {
      return false;
    }
    self.completed += 1;
    true
  }

  /// Returns false (and changes nothing) for an item that is not allocated
  pub fn fail(&mut self, item: &ItemRef) -> bool {
    if !self.release(item) {
      return false;
    }
    self.failed.push(item.clone());
    true
  }

  /// Reset to idle once the run has nothing left to do.
  ///
  /// A running run is done when both queues are empty; an aborting run is
  /// done when nothing is in flight. Returns whether a reset happened.
  pub fn finish_if_drained(&mut self) -> bool {
    let done = match self.status {
      RunStatus::Running => self.pending.is_empty() && self.allocations.is_empty(),
      RunStatus::Aborting => self.allocations.is_empty(),
      RunStatus::Idle | RunStatus::Paused => false,
    };
    if done {
      self.reset();
    }
    done
  }

  fn reset(&mut self) {
    let summary = RunSummary {
      run_id: self.run_id.take(),
      initial_count: self.initial_count,
      completed: self.completed,
      failed: std::mem::take(&mut self.failed),
      skipped: self.pending.len(),
      aborted: self.status == RunStatus::Aborting,
      started_at: self.started_at,
      finished_at: Utc::now(),
    };
    *self = OrchestratorState {
      last_run: Some(summary),
      ..Default::default()
    };
  }

  pub fn progress(&self) -> RunProgress {
    RunProgress {
      status: self.status,
      run_id: self.run_id.clone(),
      initial_count: self.initial_count,
      completed: self.completed,
      failed: self.failed.clone(),
      in_flight: self.allocations.len(),
      pending: self.pending.len(),
      free_workers: self.free_workers.len(),
      last_run: self.last_run.clone(),
    }
  }

  /// List every violated invariant (empty when consistent)
  pub fn check_invariants(&self) -> Vec<String> {
    let mut violations = Vec::new();

    let accounted = self.pending.len() + self.allocations.len() + self.failed.len() + self.completed;
    if accounted != self.initial_count {
      violations.push(format!(
        "accounting: pending {} + allocated {} + failed {} + completed {} != initial {}",
        self.pending.len(),
        self.allocations.len(),
        self.failed.len(),
        self.completed,
        self.initial_count
      ));
    }

    let mut busy = HashSet::new();
    for worker in self.allocations.values() {
      if !busy.insert(worker) {
        violations.push(format!("worker {} holds more than one item", worker));
      }
      if self.free_workers.contains(worker) {
        violations.push(format!("worker {} is both free and allocated", worker));
      }
    }

    for item in self.allocations.keys() {
      if self.pending.contains(item) {
        violations.push(format!("item {} is both pending and allocated", item));
      }
    }

    if self.status == RunStatus::Idle && !(self.allocations.is_empty() && self.pending.is_empty()) {
      violations.push("idle with queued or allocated items".to_string());
    }

    violations
  }
}
