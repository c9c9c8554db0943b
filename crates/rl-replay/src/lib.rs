//! ---
//! rl_section: "03-replay-engine"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Replay pipeline publishing recorded events with original pacing."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
//! Replays a previously recorded event against a destination server.
//!
//! A recorded event consists of three independent, time-ordered telemetry
//! streams (session/car state, speedmaps, driver data). The engine fetches
//! them page-wise from a source server, merges them into one near-chronological
//! sequence, and publishes that sequence to the destination while reproducing
//! the original pacing (optionally sped up, fast-forwarded, or skipping the
//! wait time outside of race sessions).

pub mod fetcher;
pub mod pacing;
pub mod peek;
pub mod provider;
pub mod record;
pub mod task;

pub use fetcher::{Page, PageLoader, PagedFetcher, RecordSource};
pub use provider::{GrpcDataProvider, ReplayDataProvider};
pub use record::{ReplayRecord, SessionIndex, StreamKind};
pub use task::ReplayTask;

/// Shared result type for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Errors surfaced by a replay run.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The destination rejected the event registration; nothing was started.
    #[error("event registration failed: {0}")]
    Register(#[source] tonic::Status),
    /// A publish call failed with a non-cancellation status.
    #[error("publishing {kind} data failed: {source}")]
    Publish {
        kind: StreamKind,
        #[source]
        source: tonic::Status,
    },
    /// The final unregistration call failed.
    #[error("event unregistration failed: {0}")]
    Unregister(#[source] tonic::Status),
}
