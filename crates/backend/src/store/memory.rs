use async_trait::async_trait;
use dashmap::DashMap;

use super::{StoreError, VectorStore};
use crate::domain::{item::ItemRef, segment::Segment};

/// Keeps segments in a map; nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryStore {
  rows: DashMap<String, (Segment, Vec<f32>)>,
  vector_dim: usize,
}

impl MemoryStore {
  pub fn new(vector_dim: usize) -> Self {
    Self {
      rows: DashMap::new(),
      vector_dim,
    }
  }

  pub fn get(&self, id: &str) -> Option<(Segment, Vec<f32>)> {
    self.rows.get(id).map(|row| row.value().clone())
  }

  /// Segments for one item, ordered by index
  pub fn segments_for(&self, item: &ItemRef) -> Vec<Segment> {
    let mut segments: Vec<Segment> = self
      .rows
      .iter()
      .filter(|row| &row.value().0.item == item)
      .map(|row| row.value().0.clone())
      .collect();
    segments.sort_by_key(|s| s.index);
    segments
  }
}

#[async_trait]
impl VectorStore for MemoryStore {
  async fn upsert(&self, segment: &Segment, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != self.vector_dim {
      return Err(StoreError::Dimensions {
        expected: self.vector_dim,
        got: vector.len(),
      });
    }
    self.rows.insert(segment.id.clone(), (segment.clone(), vector.to_vec()));
    Ok(())
  }

  async fn count(&self) -> Result<usize, StoreError> {
    Ok(self.rows.len())
  }

  async fn count_for_item(&self, item: &ItemRef) -> Result<usize, StoreError> {
    Ok(self.rows.iter().filter(|row| &row.value().0.item == item).count())
  }
}
