//! Status command: read persisted progress without starting anything

use anyhow::{Context, Result};
use docindex::{RuntimeConfig, actor::worker::state::WorkerStatus, snapshot};

use super::format::{format_progress, print_summary};

pub async fn cmd_status(json: bool) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let runtime = RuntimeConfig::load(&cwd);
  let snap = snapshot(&runtime).await.context("Failed to read orchestrator state")?;

  if json {
    let workers: Vec<_> = snap
      .workers
      .iter()
      .map(|(id, state)| serde_json::json!({ "id": id, "state": state }))
      .collect();
    let out = serde_json::json!({
      "orchestrator": runtime.orchestrator_id(),
      "progress": snap.progress,
      "workers": workers,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    return Ok(());
  }

  println!("Orchestrator:   {}", runtime.orchestrator_id());
  println!("State:          {}", runtime.state_dir().display());
  println!("Progress:       {}", format_progress(&snap.progress));

  if !snap.workers.is_empty() {
    println!("\n--- Workers ---");
    for (id, state) in &snap.workers {
      let activity = match (state.status, &state.current_item) {
        (WorkerStatus::Indexing, Some(item)) => format!("indexing {}", item),
        _ => "idle".to_string(),
      };
      let unreported = if state.unreported.is_some() {
        " (outcome not yet reported)"
      } else {
        ""
      };
      println!("{:<15} {}{}", id.to_string(), activity, unreported);
    }
  }

  if let Some(summary) = &snap.progress.last_run {
    println!("\n--- Last Run ---");
    print_summary(summary);
  }

  Ok(())
}
