//! Actor-based orchestration of indexing runs
//!
//! Components communicate via message passing; each actor owns its state
//! and persists it through the shared [`StateStore`] after every change, so
//! a restarted process resumes exactly where it stopped.
//!
//! # Actors
//!
//! - [`OrchestratorActor`]: owns one run; enumerates the corpus, allocates
//!   items to workers, and applies start / pause / resume / abort
//! - [`WorkerActor`]: indexes one item at a time and reports the outcome
//!   back to its orchestrator until acknowledged
//! - [`Router`]: resolves identities to live actors, spawning on demand
//! - [`Scheduler`]: optional periodic re-index
//!
//! ```text
//! Orchestrator ──process──▶ Worker ──step (retried)──▶ ItemIndexer
//!      ▲                      │
//!      └──── report / ack ────┘
//! ```
//!
//! [`StateStore`]: crate::state::StateStore
//! [`OrchestratorActor`]: orchestrator::OrchestratorActor
//! [`WorkerActor`]: worker::WorkerActor

pub mod handle;
pub mod message;
pub mod orchestrator;
pub mod retry;
mod router;
mod scheduler;
pub mod worker;


pub use router::Router;
pub use scheduler::Scheduler;
