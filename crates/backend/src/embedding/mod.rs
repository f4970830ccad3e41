mod ollama;
mod openai;

use std::sync::Arc;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::domain::{
  config::{EmbeddingConfig, EmbeddingProvider as ConfigEmbeddingProvider},
  segment::UsageStats,
};

/// A single embedding plus the token usage the provider reported for it
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
  pub vector: Vec<f32>,
  pub usage: UsageStats,
}

#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;
}

impl dyn EmbeddingClient {
  pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>, EmbeddingError> {
    match config.provider {
      ConfigEmbeddingProvider::Ollama => Ok(Arc::new(OllamaProvider::new(config)?)),
      ConfigEmbeddingProvider::OpenAi => Ok(Arc::new(OpenAiProvider::new(config)?)),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("No api key configured for provider")]
  NoApiKey,
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Provider returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("Provider error: {0}")]
  ProviderError(String),
  #[error("Network error: {0}")]
  Network(String),
  #[error("Request timed out")]
  Timeout,
  #[error("Expected {expected} dimensions, got {got}")]
  Dimensions { expected: usize, got: usize },
}

impl EmbeddingError {
  /// Whether a later attempt could plausibly succeed
  pub fn is_transient(&self) -> bool {
    match self {
      EmbeddingError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
      EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
      EmbeddingError::Network(_) | EmbeddingError::Timeout | EmbeddingError::ProviderError(_) => true,
      EmbeddingError::NoApiKey | EmbeddingError::Dimensions { .. } => false,
    }
  }
}

/// Convert a send error into the matching variant
pub(crate) fn classify_send_error(e: reqwest::Error) -> EmbeddingError {
  if e.is_timeout() {
    EmbeddingError::Timeout
  } else if e.is_connect() {
    EmbeddingError::Network(e.to_string())
  } else {
    EmbeddingError::Request(e)
  }
}
