use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, trace, warn};

use super::{Embedding, EmbeddingClient, EmbeddingError, classify_send_error};
use crate::domain::{config::EmbeddingConfig, segment::UsageStats};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
  client: reqwest::Client,
  base_url: String,
  model: String,
  dimensions: usize,
}

impl OllamaProvider {
  pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
    let base_url = config.ollama_url.trim_end_matches('/').to_string();
    let model = config.model.clone();
    let dimensions = config.dimensions;

    info!(base_url, model, dimensions, "Ollama provider initialized");
    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
      model,
      dimensions,
    })
  }

  fn embed_url(&self) -> String {
    format!("{}/api/embed", self.base_url)
  }
}

/// Request for /api/embed
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
  model: &'a str,
  input: Vec<&'a str>,
}

/// Response from /api/embed
#[derive(Debug, Deserialize)]
struct EmbedResponse {
  embeddings: Vec<Vec<f32>>,
  #[serde(default)]
  prompt_eval_count: Option<u64>,
}

#[async_trait]
impl EmbeddingClient for OllamaProvider {
  fn name(&self) -> &str {
    "ollama"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  #[tracing::instrument(level = "trace", skip(self, text), fields(text_len = text.len()))]
  async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
    let request = EmbedRequest {
      model: &self.model,
      input: vec![text],
    };

    let start = Instant::now();
    let response = self
      .client
      .post(self.embed_url())
      .json(&request)
      .send()
      .await
      .map_err(classify_send_error)?;

    trace!(
      status = %response.status(),
      elapsed_ms = start.elapsed().as_millis(),
      "Received embedding response"
    );

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      warn!(status = %status, model = %self.model, "Ollama embedding failed");
      return Err(EmbeddingError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let result: EmbedResponse = response.json().await?;
    let Some(vector) = result.embeddings.into_iter().next() else {
      return Err(EmbeddingError::ProviderError("Ollama returned no embeddings".to_string()));
    };

    if vector.len() != self.dimensions {
      warn!(
        expected = self.dimensions,
        got = vector.len(),
        model = %self.model,
        "Unexpected embedding dimensions"
      );
      return Err(EmbeddingError::Dimensions {
        expected: self.dimensions,
        got: vector.len(),
      });
    }

    let tokens = result.prompt_eval_count.unwrap_or(0);
    Ok(Embedding {
      vector,
      usage: UsageStats {
        input_tokens: tokens,
        total_tokens: tokens,
      },
    })
  }
}
