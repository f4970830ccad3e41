//! Segments produced by splitting an item, and the usage reported when
//! embedding them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::item::ItemRef;

/// A bounded slice of an item's content, ready to be embedded and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
  /// Deterministic id: re-indexing the same item overwrites the same rows
  pub id: String,
  /// Item the segment was cut from
  pub item: ItemRef,
  /// File name of the item (the `src` label)
  pub src: String,
  /// Segment text
  pub content: String,
  /// Position of the segment within the item
  pub index: usize,
  /// Total number of segments the item was split into
  pub total: usize,
  /// Character offset of the segment start within the item content
  pub char_offset: usize,
}

impl Segment {
  pub fn new(item: &ItemRef, index: usize, total: usize, char_offset: usize, content: String) -> Self {
    Self {
      id: segment_id(item, index),
      src: item.file_name().to_string(),
      item: item.clone(),
      content,
      index,
      total,
      char_offset,
    }
  }
}

/// Hex sha256 over the item reference and segment index
pub fn segment_id(item: &ItemRef, index: usize) -> String {
  let mut hasher = Sha256::new();
  hasher.update(item.as_str().as_bytes());
  hasher.update(b":");
  hasher.update(index.to_le_bytes());
  hex::encode(hasher.finalize())
}

/// Token usage reported by an embedding call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
  pub input_tokens: u64,
  pub total_tokens: u64,
}

impl std::ops::AddAssign for UsageStats {
  fn add_assign(&mut self, rhs: Self) {
    self.input_tokens += rhs.input_tokens;
    self.total_tokens += rhs.total_tokens;
  }
}
