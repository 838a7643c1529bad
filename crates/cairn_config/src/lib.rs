//! Parsing and validation of `cairn.toml` engine configuration files.
//!
//! This crate reads the engine configuration and produces a strongly-typed
//! [`EngineConfig`], then resolves it against a project directory into the
//! settings the orchestrator consumes.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use resolve::{resolve_engine, ResolvedEngine};
pub use types::*;
