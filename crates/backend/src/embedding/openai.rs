use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use super::{Embedding, EmbeddingClient, EmbeddingError, classify_send_error};
use crate::domain::{config::EmbeddingConfig, segment::UsageStats};

/// Client for any service exposing the OpenAI `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
  client: reqwest::Client,
  base_url: String,
  api_key: String,
  model: String,
  dimensions: usize,
}

impl OpenAiProvider {
  pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
    let Some(api_key) = config.resolved_api_key() else {
      debug!("No API key configured and OPENAI_API_KEY not set");
      return Err(EmbeddingError::NoApiKey);
    };

    let base_url = config.openai_url.trim_end_matches('/').to_string();
    let model = config.model.clone();
    let dimensions = config.dimensions;

    info!(base_url, model, dimensions, "OpenAI-compatible provider initialized");
    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
      api_key,
      model,
      dimensions,
    })
  }

  fn embeddings_url(&self) -> String {
    format!("{}/embeddings", self.base_url)
  }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  input: &'a str,
  dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingData>,
  #[serde(default)]
  usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
  embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: u64,
  #[serde(default)]
  total_tokens: u64,
}

#[async_trait]
impl EmbeddingClient for OpenAiProvider {
  fn name(&self) -> &str {
    "openai"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  #[tracing::instrument(level = "trace", skip(self, text), fields(text_len = text.len()))]
  async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
    let request = EmbeddingRequest {
      model: &self.model,
      input: text,
      dimensions: self.dimensions,
    };

    let start = Instant::now();
    let response = self
      .client
      .post(self.embeddings_url())
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await
      .map_err(classify_send_error)?;

    let status = response.status();
    trace!(status = %status, elapsed_ms = start.elapsed().as_millis(), "Received embedding response");

    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      match status.as_u16() {
        401 | 403 => error!(status = %status, model = %self.model, "Embedding provider authentication failed"),
        429 => warn!(status = %status, model = %self.model, "Embedding provider rate limit exceeded"),
        _ => warn!(status = %status, model = %self.model, "Embedding request failed"),
      }
      return Err(EmbeddingError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let result: EmbeddingResponse = response.json().await?;
    let Some(data) = result.data.into_iter().next() else {
      return Err(EmbeddingError::ProviderError("Provider returned no embeddings".to_string()));
    };

    if data.embedding.len() != self.dimensions {
      return Err(EmbeddingError::Dimensions {
        expected: self.dimensions,
        got: data.embedding.len(),
      });
    }

    let usage = result
      .usage
      .map(|u| UsageStats {
        input_tokens: u.prompt_tokens,
        total_tokens: u.total_tokens,
      })
      .unwrap_or_default();

    Ok(Embedding {
      vector: data.embedding,
      usage,
    })
  }
}
