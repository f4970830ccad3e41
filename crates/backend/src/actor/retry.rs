//! Bounded retry with exponential backoff around the worker's indexing step.

use std::{future::Future, time::Duration};

use tracing::{debug, info, warn};

use crate::{
  domain::config::WorkerConfig,
  indexing::{IndexReport, IndexingError},
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total attempts, including the first
  pub max_attempts: u32,
  /// Initial backoff duration
  pub initial_backoff: Duration,
  /// Maximum backoff duration
  pub max_backoff: Duration,
  /// Backoff multiplier (exponential factor)
  pub backoff_multiplier: f64,
  /// Whether to add jitter to backoff
  pub jitter: bool,
  /// Bound on a single attempt
  pub step_timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from_config(&WorkerConfig::default())
  }
}

impl RetryPolicy {
  pub fn from_config(config: &WorkerConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      initial_backoff: Duration::from_millis(config.initial_backoff_ms),
      max_backoff: Duration::from_millis(config.max_backoff_ms),
      backoff_multiplier: config.backoff_multiplier,
      jitter: config.jitter,
      step_timeout: Duration::from_secs(config.step_timeout_secs),
    }
  }

  /// Calculate backoff duration after the given (0-based) failed attempt
  pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
    let mut backoff = Duration::from_secs_f64(base.min(self.max_backoff.as_secs_f64()));

    if self.jitter {
      // Add up to 25% jitter
      let jitter_factor = 1.0 + (rand_f64() * 0.25);
      backoff = Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
    }

    backoff.min(self.max_backoff)
  }

  /// Run `step` until it succeeds, fails permanently, or attempts run out.
  ///
  /// Each attempt is bounded by `step_timeout`; a timeout counts as a failed
  /// transient attempt.
  pub async fn run<F, Fut>(&self, label: &str, mut step: F) -> Result<IndexReport, RetryError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<IndexReport, IndexingError>>,
  {
    let max_attempts = self.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
      if attempt > 0 {
        let backoff = self.backoff_for_attempt(attempt - 1);
        debug!(
          item = label,
          attempt = attempt + 1,
          max_attempts,
          backoff_ms = backoff.as_millis(),
          "Retrying indexing step after backoff"
        );
        tokio::time::sleep(backoff).await;
      }

      match tokio::time::timeout(self.step_timeout, step()).await {
        Ok(Ok(report)) => {
          if attempt > 0 {
            info!(item = label, attempt = attempt + 1, "Indexing step succeeded after retry");
          }
          return Ok(report);
        }
        Ok(Err(e)) if !e.is_transient() => {
          warn!(item = label, attempt = attempt + 1, err = %e, "Permanent indexing failure");
          return Err(RetryError::Permanent(e.to_string()));
        }
        Ok(Err(e)) => {
          warn!(
            item = label,
            attempt = attempt + 1,
            max_attempts,
            err = %e,
            "Transient indexing failure"
          );
          last_error = e.to_string();
        }
        Err(_) => {
          warn!(
            item = label,
            attempt = attempt + 1,
            max_attempts,
            timeout_ms = self.step_timeout.as_millis(),
            "Indexing step timed out"
          );
          last_error = format!("step timed out after {:?}", self.step_timeout);
        }
      }
    }

    warn!(item = label, max_attempts, "All attempts exhausted");
    Err(RetryError::Exhausted {
      attempts: max_attempts,
      last_error,
    })
  }
}

/// A simple pseudo-random number generator for jitter
fn rand_f64() -> f64 {
  use std::time::{SystemTime, UNIX_EPOCH};

  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .subsec_nanos();

  (nanos as f64 / u32::MAX as f64).fract()
}

/// Terminal failure of an item
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
  #[error("gave up after {attempts} attempts: {last_error}")]
  Exhausted { attempts: u32, last_error: String },
  #[error("permanent failure: {0}")]
  Permanent(String),
}
