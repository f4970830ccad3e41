//! docindex CLI - Durable, resumable document indexing

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

use commands::{RunOptions, cmd_config_init, cmd_config_show, cmd_run, cmd_status};
use logging::{init_cli_logging, init_run_logging};

#[derive(Parser)]
#[command(name = "docindex")]
#[command(about = "Durable, resumable document indexing")]
#[command(after_help = "\
QUICK START:
  docindex config init            # Initialize project config
  docindex run                    # Index the corpus, resuming any interrupted run
  docindex status                 # Show persisted progress

WHILE RUNNING:
  Type pause, resume, abort, start, status or quit on stdin.
  Ctrl-C stops the process; the run resumes on the next 'docindex run'.")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
  #[command(long_about = "Show the current effective configuration.\n\n\
    Displays which config file is being used and its contents as TOML.")]
  Show,

  #[command(long_about = "Initialize a project-specific configuration file.\n\n\
    Creates .docindex/config.toml with every setting at its default.")]
  Init,
}

#[derive(Subcommand)]
enum Commands {
  #[command(after_help = "\
EXAMPLES:
  docindex run                    # Start or resume a run in the working directory
  docindex run --root docs        # Index a different directory
  docindex run --pool-size 8      # Use more workers
  docindex run --no-start         # Only resume an interrupted run, then wait for commands")]
  Run {
    /// Corpus root (default: configured index.root, or the working directory)
    #[arg(long)]
    root: Option<PathBuf>,
    /// Number of workers (default: configured index.pool_size)
    #[arg(long)]
    pool_size: Option<usize>,
    /// Do not start a new run when idle
    #[arg(long)]
    no_start: bool,
  },
  Status {
    #[arg(long)]
    json: bool,
  },
  #[command(after_help = "\
CONFIG LOCATIONS:
  Project: .docindex/config.toml
  User:    ~/.config/docindex/config.toml")]
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run {
      root,
      pool_size,
      no_start,
    } => {
      let cwd = std::env::current_dir()?;
      let mut runtime = docindex::RuntimeConfig::load(&cwd);
      if let Some(root) = root {
        runtime.root = if root.is_absolute() { root } else { cwd.join(root) };
      }
      if let Some(pool_size) = pool_size {
        runtime.config.index.pool_size = pool_size;
      }

      // kept alive until the process exits so buffered lines are flushed
      let _guard = init_run_logging(&runtime.config.daemon);
      cmd_run(runtime, RunOptions { no_start }).await
    }
    Commands::Status { json } => {
      init_cli_logging();
      cmd_status(json).await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Show => cmd_config_show().await,
        ConfigCommand::Init => cmd_config_init().await,
      }
    }
  }
}
