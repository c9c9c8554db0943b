//! ---
//! rl_section: "01-shared-runtime"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Shared primitives and utilities for the client tooling."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
//! Core shared primitives for the racelog client workspace.
//! This crate exposes configuration loading, logging, and version metadata
//! utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{CliConfig, LoggingConfig, ReplayDefaults, TlsSettings};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
