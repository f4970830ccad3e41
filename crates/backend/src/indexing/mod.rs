//! The per-item side effect: read a document, split it, embed each segment
//! and upsert it into the vector store.
//!
//! Workers drive this through the [`ItemIndexer`] trait so the actors can be
//! exercised without a live embedding provider.

pub mod source;
pub mod splitter;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info};

use self::splitter::Segmenter;
use crate::{
  domain::{
    item::ItemRef,
    segment::{Segment, UsageStats},
  },
  embedding::{EmbeddingClient, EmbeddingError},
  store::{StoreError, VectorStore},
};

/// What one successful indexing step produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
  pub segments: usize,
  pub usage: UsageStats,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
  #[error("Document not found: {0}")]
  NotFound(ItemRef),
  #[error("Document is not valid UTF-8: {0}")]
  InvalidUtf8(ItemRef),
  #[error("Failed to read {item}: {source}")]
  Read {
    item: ItemRef,
    #[source]
    source: std::io::Error,
  },
  #[error("Embedding segment {index} failed: {source}")]
  Embedding {
    index: usize,
    #[source]
    source: EmbeddingError,
  },
  #[error("Storing segment {index} failed: {source}")]
  Store {
    index: usize,
    #[source]
    source: StoreError,
  },
}

impl IndexingError {
  /// Transient failures are retried; the rest fail the item at once
  pub fn is_transient(&self) -> bool {
    match self {
      IndexingError::NotFound(_) | IndexingError::InvalidUtf8(_) => false,
      IndexingError::Read { .. } => true,
      IndexingError::Embedding { source, .. } => source.is_transient(),
      IndexingError::Store { source, .. } => source.is_transient(),
    }
  }
}

#[async_trait]
pub trait ItemIndexer: Send + Sync {
  async fn index(&self, item: &ItemRef) -> Result<IndexReport, IndexingError>;
}

/// Splits, embeds and stores one document
pub struct EmbeddingIndexer {
  segmenter: Arc<dyn Segmenter>,
  embedder: Arc<dyn EmbeddingClient>,
  store: Arc<dyn VectorStore>,
  /// Pause between segments
  segment_delay: Duration,
}

impl EmbeddingIndexer {
  pub fn new(segmenter: Arc<dyn Segmenter>, embedder: Arc<dyn EmbeddingClient>, store: Arc<dyn VectorStore>) -> Self {
    Self {
      segmenter,
      embedder,
      store,
      segment_delay: Duration::ZERO,
    }
  }

  pub fn with_segment_delay(mut self, delay: Duration) -> Self {
    self.segment_delay = delay;
    self
  }

  async fn read(item: &ItemRef) -> Result<String, IndexingError> {
    let bytes = match tokio::fs::read(item.as_path()).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(IndexingError::NotFound(item.clone())),
      Err(source) => {
        return Err(IndexingError::Read {
          item: item.clone(),
          source,
        });
      }
    };
    String::from_utf8(bytes).map_err(|_| IndexingError::InvalidUtf8(item.clone()))
  }
}

#[async_trait]
impl ItemIndexer for EmbeddingIndexer {
  #[tracing::instrument(level = "trace", skip(self), fields(item = %item))]
  async fn index(&self, item: &ItemRef) -> Result<IndexReport, IndexingError> {
    let content = Self::read(item).await?;
    if content.trim().is_empty() {
      debug!(item = %item, "Blank document, nothing to index");
      return Ok(IndexReport::default());
    }

    let texts = self.segmenter.split(&content);
    let total = texts.len();
    let mut report = IndexReport::default();

    for (index, text) in texts.into_iter().enumerate() {
      if index > 0 && !self.segment_delay.is_zero() {
        tokio::time::sleep(self.segment_delay).await;
      }

      let segment = Segment::new(item, index, total, text.char_offset, text.content);
      let embedding = self
        .embedder
        .embed(&segment.content)
        .await
        .map_err(|source| IndexingError::Embedding { index, source })?;

      debug!(
        item = %item,
        segment = index,
        input_tokens = embedding.usage.input_tokens,
        total_tokens = embedding.usage.total_tokens,
        "Segment embedded"
      );

      self
        .store
        .upsert(&segment, &embedding.vector)
        .await
        .map_err(|source| IndexingError::Store { index, source })?;

      report.segments += 1;
      report.usage += embedding.usage;
    }

    info!(
      item = %item,
      segments = report.segments,
      input_tokens = report.usage.input_tokens,
      total_tokens = report.usage.total_tokens,
      "Document indexed"
    );
    Ok(report)
  }
}
