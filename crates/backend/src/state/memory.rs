use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StateError, StateStore};

/// In-process store. Clones share the same map, so a "restart" in tests is
/// just respawning actors against a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
  docs: Arc<DashMap<String, Vec<u8>>>,
  failing: Arc<AtomicBool>,
  failing_prefixes: Arc<DashMap<String, ()>>,
  /// Remaining load failures per key prefix
  failing_loads: Arc<DashMap<String, usize>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent save fail with `Unavailable`
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Fail only saves whose key starts with `prefix`
  pub fn set_failing_prefix(&self, prefix: &str, failing: bool) {
    if failing {
      self.failing_prefixes.insert(prefix.to_string(), ());
    } else {
      self.failing_prefixes.remove(prefix);
    }
  }

  /// Fail the next `times` loads whose key starts with `prefix`
  pub fn fail_loads(&self, prefix: &str, times: usize) {
    self.failing_loads.insert(prefix.to_string(), times);
  }

  pub fn load_failures_left(&self, prefix: &str) -> usize {
    self.failing_loads.get(prefix).map(|left| *left).unwrap_or(0)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.docs.contains_key(key)
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
    for mut left in self.failing_loads.iter_mut() {
      if *left > 0 && key.starts_with(left.key().as_str()) {
        *left -= 1;
        return Err(StateError::Unavailable(format!("refusing read of {}", key)));
      }
    }
    Ok(self.docs.get(key).map(|entry| entry.value().clone()))
  }

  async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), StateError> {
    let prefix_failing = self.failing_prefixes.iter().any(|p| key.starts_with(p.key().as_str()));
    if prefix_failing || self.failing.load(Ordering::SeqCst) {
      return Err(StateError::Unavailable(format!("refusing write to {}", key)));
    }
    self.docs.insert(key.to_string(), bytes);
    Ok(())
  }
}
