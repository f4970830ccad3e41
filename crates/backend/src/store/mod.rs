//! Vector storage for embedded segments.

mod lance;
mod memory;
mod schema;

use std::sync::Arc;

pub use lance::LanceStore;
pub use memory::MemoryStore;

use crate::domain::{
  config::{StoreBackend, StoreConfig},
  item::ItemRef,
  segment::Segment,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Vector has {got} dimensions, table expects {expected}")]
  Dimensions { expected: usize, got: usize },
}

impl StoreError {
  pub fn is_transient(&self) -> bool {
    !matches!(self, StoreError::Dimensions { .. })
  }
}

/// Upsert-only sink for embedded segments, keyed by segment id
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
  async fn upsert(&self, segment: &Segment, vector: &[f32]) -> Result<(), StoreError>;

  /// Total number of stored segments
  async fn count(&self) -> Result<usize, StoreError>;

  /// Number of stored segments cut from one item
  async fn count_for_item(&self, item: &ItemRef) -> Result<usize, StoreError>;
}

impl dyn VectorStore {
  pub async fn from_config(config: &StoreConfig, vector_dim: usize) -> Result<Arc<dyn VectorStore>, StoreError> {
    match config.backend {
      StoreBackend::Lance => {
        let store = LanceStore::open(config.resolved_path(), &config.table, vector_dim).await?;
        Ok(Arc::new(store))
      }
      StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(vector_dim))),
    }
  }
}
