//! Durable entity state.
//!
//! Every orchestrator and worker transition is written through a
//! [`StateStore`] before it is acknowledged, and read back when the entity
//! is respawned. Documents are JSON, keyed `orchestrator/{id}` and
//! `worker/{id}`.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
use serde::{Serialize, de::DeserializeOwned};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
  #[error("State I/O error for {key}: {source}")]
  Io {
    key: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Corrupt state document {key}: {source}")]
  Decode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("Failed to encode state document {key}: {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("State store unavailable: {0}")]
  Unavailable(String),
}

#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
  async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StateError>;
  async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), StateError>;
}

pub fn orchestrator_key(id: &crate::domain::item::OrchestratorId) -> String {
  format!("orchestrator/{}", id)
}

pub fn worker_key(id: &crate::domain::item::WorkerId) -> String {
  format!("worker/{}", id)
}

pub async fn load_json<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>, StateError> {
  let Some(bytes) = store.load(key).await? else {
    return Ok(None);
  };

  serde_json::from_slice(&bytes)
    .map(Some)
    .map_err(|source| StateError::Decode {
      key: key.to_string(),
      source,
    })
}

pub async fn save_json<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) -> Result<(), StateError> {
  let bytes = serde_json::to_vec_pretty(value).map_err(|source| StateError::Encode {
    key: key.to_string(),
    source,
  })?;
  store.save(key, bytes).await
}
