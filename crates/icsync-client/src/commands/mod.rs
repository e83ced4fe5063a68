//! Subcommand implementations.

pub mod backup;
pub mod config;
pub mod daemon;
pub mod subscriptions;
pub mod sync;
