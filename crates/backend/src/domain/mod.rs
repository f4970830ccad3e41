//! Domain types shared by the actors, the indexing pipeline and the CLI.
//!
//! These types are independent of persistence and transport concerns.

pub mod config;
pub mod item;
pub mod segment;
