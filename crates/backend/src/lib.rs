pub mod actor;
pub mod embedding;
pub mod indexing;
pub mod state;
pub mod store;

mod domain;
pub use domain::{config, item, segment};

pub mod dirs;

mod daemon;
pub use daemon::{Daemon, DaemonError, RuntimeConfig, Snapshot, snapshot};
