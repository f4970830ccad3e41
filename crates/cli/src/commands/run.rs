//! Run command: drive the orchestrator in the foreground
//!
//! Starts (or resumes) a run, prints progress, and accepts control commands on
//! stdin. Everything the orchestrator does is persisted, so stopping the process
//! at any point is safe; the next `docindex run` picks up where this one left off.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use docindex::{
  Daemon, RuntimeConfig,
  actor::{
    handle::OrchestratorHandle,
    orchestrator::{
      OrchestratorError,
      state::{CommandKind, RunStatus, RunSummary},
    },
  },
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::format::{format_progress, print_summary};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

pub struct RunOptions {
  /// Only resume what was persisted; never begin a new run on launch
  pub no_start: bool,
}

enum LineAction {
  Continue,
  Quit,
}

pub async fn cmd_run(runtime: RuntimeConfig, options: RunOptions) -> Result<()> {
  info!(root = %runtime.root.display(), pool_size = runtime.config.index.pool_size, "Starting docindex");

  let daemon = Daemon::start(&runtime).await.context("Failed to start orchestrator")?;
  let cancel = daemon.cancel_token();

  let signal_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Received Ctrl-C, stopping (progress is saved)");
      signal_cancel.cancel();
    }
  });

  let result = drive(&daemon, &runtime, &options).await;
  daemon.shutdown().await;
  result
}

async fn drive(daemon: &Daemon, runtime: &RuntimeConfig, options: &RunOptions) -> Result<()> {
  let id = runtime.orchestrator_id();
  let cancel = daemon.cancel_token();

  let initial = daemon.orchestrator().progress().await?;
  let mut last_summary: Option<RunSummary> = initial.last_run.clone();

  match initial.status {
    RunStatus::Idle if options.no_start => println!("Idle; type 'start' to begin a run"),
    RunStatus::Idle => {
      daemon
        .orchestrator()
        .start()
        .await
        .context("Failed to start run")?;
      println!("Started run over {}", runtime.root.display());
    }
    status => println!(
      "Resuming {} run {}: {}",
      status,
      initial.run_id.as_deref().unwrap_or("-"),
      format_progress(&initial)
    ),
  }

  // keep serving commands after a run finishes
  let stay = options.no_start || runtime.config.daemon.reindex_interval_secs > 0;

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut stdin_open = true;
  let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
  ticker.tick().await;

  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => return Ok(()),

      line = lines.next_line(), if stdin_open => match line {
        Ok(Some(line)) => {
          let orchestrator = resolve(daemon, &id).await?;
          if let LineAction::Quit = handle_line(&orchestrator, line.trim()).await? {
            return Ok(());
          }
        }
        Ok(None) => stdin_open = false,
        Err(e) => {
          warn!(err = %e, "Failed to read stdin, control commands disabled");
          stdin_open = false;
        }
      },

      _ = ticker.tick() => {
        let progress = resolve(daemon, &id).await?.progress().await?;

        if progress.last_run != last_summary {
          if let Some(summary) = &progress.last_run {
            print_summary(summary);
          }
          last_summary = progress.last_run.clone();
          if !stay && progress.status == RunStatus::Idle {
            return Ok(());
          }
        } else if progress.status != RunStatus::Idle {
          println!("{}", format_progress(&progress));
        }
      }
    }
  }
}

/// The router restarts an orchestrator that stopped, so always ask it
async fn resolve(daemon: &Daemon, id: &docindex::item::OrchestratorId) -> Result<OrchestratorHandle> {
  match daemon.router().orchestrator(id).await {
    Some(handle) => Ok(handle),
    None => bail!("Orchestrator {} is not running", id),
  }
}

async fn handle_line(orchestrator: &OrchestratorHandle, line: &str) -> Result<LineAction> {
  let command = match line.to_lowercase().as_str() {
    "" => return Ok(LineAction::Continue),
    "quit" | "exit" | "q" => return Ok(LineAction::Quit),
    "status" => {
      println!("{}", format_progress(&orchestrator.progress().await?));
      return Ok(LineAction::Continue);
    }
    "start" => CommandKind::Start,
    "pause" => CommandKind::Pause,
    "resume" => CommandKind::Resume,
    "abort" => CommandKind::Abort,
    other => {
      println!("Unknown command '{}'. Try start, pause, resume, abort, status or quit", other);
      return Ok(LineAction::Continue);
    }
  };

  let result = match command {
    CommandKind::Start => orchestrator.start().await,
    CommandKind::Pause => orchestrator.pause().await,
    CommandKind::Resume => orchestrator.resume().await,
    CommandKind::Abort => orchestrator.abort().await,
  };

  match result {
    Ok(()) => {
      println!("{}", format_progress(&orchestrator.progress().await?));
      Ok(LineAction::Continue)
    }
    Err(OrchestratorError::ActorGone) => bail!("Orchestrator has shut down"),
    // rejected or failed commands leave the run as it was
    Err(e) => {
      println!("{}", e);
      Ok(LineAction::Continue)
    }
  }
}
