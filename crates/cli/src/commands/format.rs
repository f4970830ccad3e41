//! Human-readable rendering of run progress

use docindex::actor::orchestrator::state::{RunProgress, RunSummary};

/// One line, e.g. `running 12/40 (30%) in-flight 4 pending 24 failed 1`
pub fn format_progress(progress: &RunProgress) -> String {
  let mut line = format!(
    "{} {}/{} ({}%) in-flight {} pending {}",
    progress.status,
    progress.processed(),
    progress.initial_count,
    progress.percent(),
    progress.in_flight,
    progress.pending,
  );
  if !progress.failed.is_empty() {
    line.push_str(&format!(" failed {}", progress.failed.len()));
  }
  line
}

pub fn print_summary(summary: &RunSummary) {
  let outcome = if summary.aborted { "aborted" } else { "finished" };
  println!(
    "Run {} {}: {} completed, {} failed, {} skipped of {}",
    summary.run_id.as_deref().unwrap_or("-"),
    outcome,
    summary.completed,
    summary.failed.len(),
    summary.skipped,
    summary.initial_count,
  );

  for item in summary.failed.iter().take(10) {
    println!("  failed: {}", item);
  }
  if summary.failed.len() > 10 {
    println!("  ... and {} more", summary.failed.len() - 10);
  }
}
