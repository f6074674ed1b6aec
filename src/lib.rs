#![forbid(unsafe_code)]

//! Discover AI-worker sessions, spawn worker processes, and inject
//! structured context updates into their standard input.

pub mod config;
pub mod discovery;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod stream;

pub use config::InjectorConfig;
pub use errors::{AppError, Result};
