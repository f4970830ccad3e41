use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{orchestrator::OrchestratorError, router::Router};
use crate::domain::item::OrchestratorId;

/// Periodically asks an orchestrator to start a fresh run.
///
/// A tick that lands while a run is still in progress is rejected by the
/// orchestrator and skipped here; the next tick tries again. The handle is
/// looked up through the router on every tick, so an orchestrator that was
/// restarted keeps getting scheduled.
pub struct Scheduler {
  router: Router,
  orchestrator: OrchestratorId,
  every: Duration,
}

impl Scheduler {
  pub fn new(router: Router, orchestrator: OrchestratorId, every: Duration) -> Self {
    Self {
      router,
      orchestrator,
      every,
    }
  }

  /// Run the scheduler until cancelled.
  pub async fn run(self, cancel: CancellationToken) {
    let mut reindex_timer = interval(self.every);

    // Skip the immediate tick
    reindex_timer.tick().await;

    info!(orchestrator = %self.orchestrator, interval_secs = self.every.as_secs(), "Scheduler started");

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Scheduler shutting down (cancelled)");
          break;
        }

        _ = reindex_timer.tick() => self.trigger().await,
      }
    }

    info!("Scheduler stopped");
  }

  async fn trigger(&self) {
    let Some(handle) = self.router.orchestrator(&self.orchestrator).await else {
      warn!(orchestrator = %self.orchestrator, "Orchestrator not running, skipping scheduled re-index");
      return;
    };

    match handle.start().await {
      Ok(()) => info!(orchestrator = %self.orchestrator, "Scheduled re-index started"),
      Err(OrchestratorError::Validation { status, .. }) => {
        debug!(%status, "Previous run still active, skipping scheduled re-index");
      }
      Err(e) => warn!(orchestrator = %self.orchestrator, err = %e, "Scheduled re-index failed"),
    }
  }
}
