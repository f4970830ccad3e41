//! CLI command implementations

mod config;
mod format;
mod run;
mod status;

pub use config::{cmd_config_init, cmd_config_show};
pub use run::{RunOptions, cmd_run};
pub use status::cmd_status;
