//! Identifiers for indexable items and the entities that process them.

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

/// Opaque reference to one unit of indexable content (a file path).
///
/// Immutable once enumerated for a run. Ordered so it can key the
/// allocation map deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemRef(String);

impl ItemRef {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn from_path(path: &Path) -> Self {
    Self(path.to_string_lossy().into_owned())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn as_path(&self) -> &Path {
    Path::new(&self.0)
  }

  /// Final path component, used as the `src` label on stored segments
  pub fn file_name(&self) -> &str {
    self
      .as_path()
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or(self.0.as_str())
  }
}

impl fmt::Display for ItemRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ItemRef {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}

/// Identity of a worker entity. Stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  /// Derive the identity of the `index`-th worker owned by an orchestrator.
  ///
  /// Only called once per run at `start`; the result is stored in the
  /// orchestrator state and read back from there afterwards.
  pub fn for_pool(orchestrator: &OrchestratorId, index: usize) -> Self {
    Self(format!("{}-worker-{}", orchestrator.as_str(), index))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for WorkerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Identity of an orchestrator (one logical run-controller).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrchestratorId(String);

impl OrchestratorId {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for OrchestratorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl Default for OrchestratorId {
  fn default() -> Self {
    Self::new("default")
  }
}
