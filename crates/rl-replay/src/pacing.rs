//! ---
//! rl_section: "03-replay-engine"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Replay pipeline publishing recorded events with original pacing."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use rl_proto::common::v1::SessionType;

/// Pacing policy applied between two published records.
///
/// Holds the speed multiplier (0 = unthrottled), the optional fast-forward
/// window, and the pre-race skip flag. The fast-forward stop time is armed
/// lazily from the first record offered to [`Pacing::arm`] and never
/// recomputed afterwards.
#[derive(Debug, Clone)]
pub(crate) struct Pacing {
    speed: u32,
    fast_forward: Option<Duration>,
    ff_pre_race: bool,
    ff_stop: Option<DateTime<Utc>>,
}

impl Pacing {
    pub(crate) fn new(speed: u32, fast_forward: Option<Duration>, ff_pre_race: bool) -> Self {
        Self {
            speed,
            fast_forward,
            ff_pre_race,
            ff_stop: None,
        }
    }

    /// Arm the fast-forward stop time at `anchor + fast_forward` once.
    pub(crate) fn arm(&mut self, anchor: DateTime<Utc>) {
        if self.ff_stop.is_some() {
            return;
        }
        if let Some(fast_forward) = self.fast_forward {
            let window = chrono::Duration::from_std(fast_forward)
                .unwrap_or_else(|_| chrono::Duration::MAX);
            self.ff_stop = anchor.checked_add_signed(window);
            debug!(stop = ?self.ff_stop, "fast forward stop time set");
        }
    }

    /// Delay to apply before publishing the record stamped `next`, given the
    /// previously published timestamp `last` and the next record's session
    /// type.
    ///
    /// Speed 0 means "as fast as possible" and never sleeps.
    pub(crate) fn wait_for(
        &self,
        next: DateTime<Utc>,
        last: DateTime<Utc>,
        session_type: SessionType,
    ) -> Duration {
        // no waiting for records prior to the race session if requested
        if self.ff_pre_race && session_type != SessionType::Race {
            return Duration::ZERO;
        }
        if let Some(stop) = self.ff_stop {
            if next < stop {
                return Duration::ZERO;
            }
        }
        let delta = (next - last).to_std().unwrap_or(Duration::ZERO);
        match self.speed {
            0 => Duration::ZERO,
            speed => delta / speed,
        }
    }
}
