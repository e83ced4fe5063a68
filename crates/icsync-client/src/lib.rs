//! CLI for managing subscriptions and running the sync engine
//!
//! This crate provides the `icsync` command-line interface.

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;

pub use cli::Cli;
pub use engine::Engine;
pub use error::{ClientError, ClientResult};
