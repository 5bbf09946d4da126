//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the path given on the command
//!   line (default `config/config.toml`).
//! - Filling in defaults for every optional setting.
//! - Validating the result before any worker starts.

pub mod config;
