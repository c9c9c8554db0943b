//! ---
//! rl_section: "01-shared-runtime"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Shared primitives and utilities for the client tooling."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
/// Build-time version metadata reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    version: &'static str,
}

impl VersionInfo {
    /// Version of the current build.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Short version string for log fields.
    pub fn cli_string(&self) -> String {
        format!("v{}", self.version)
    }

    /// Extended human-readable version line.
    pub fn extended(&self) -> String {
        format!("rlctl v{} ({})", self.version, env!("CARGO_PKG_NAME"))
    }
}
