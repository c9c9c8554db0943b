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
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Code;
use tracing::{debug, error, info};

use rl_net::with_api_token;
use rl_proto::common::v1::{event_selector, EventSelector};
use rl_proto::provider::v1::provider_service_client::ProviderServiceClient;
use rl_proto::provider::v1::UnregisterEventRequest;
use rl_proto::racestate::v1::race_state_service_client::RaceStateServiceClient;

use crate::fetcher::RecordSource;
use crate::pacing::Pacing;
use crate::peek::{MergeCandidate, PeekableStream};
use crate::provider::ReplayDataProvider;
use crate::record::{ReplayRecord, SessionIndex};
use crate::{ReplayError, Result};

/// Replays one recorded event against a destination server.
///
/// The task registers the event, streams the three telemetry kinds through a
/// k-way timestamp merge, and unregisters the event when done, also after
/// cancellation or a failed publish. [`ReplayTask::replay`] is synchronous
/// from the caller's point of view and only returns after the full lifecycle
/// has completed.
pub struct ReplayTask<P> {
    dest: Channel,
    provider: P,
    speed: u32,
    fast_forward: Option<Duration>,
    ff_pre_race: bool,
    token: Option<String>,
    cancel: CancellationToken,
}

impl<P: ReplayDataProvider> ReplayTask<P> {
    pub fn new(dest: Channel, provider: P) -> Self {
        Self {
            dest,
            provider,
            speed: 0,
            fast_forward: None,
            ff_pre_race: true,
            token: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Playback speed multiplier; 0 replays as fast as possible.
    pub fn with_speed(mut self, speed: u32) -> Self {
        self.speed = speed;
        self
    }

    /// Replay the given span of event time without pacing delay, anchored at
    /// the first published record.
    pub fn with_fast_forward(mut self, fast_forward: Duration) -> Self {
        self.fast_forward = Some(fast_forward);
        self
    }

    /// Skip pacing delays for records outside a race session (default: on).
    pub fn with_fast_forward_pre_race(mut self, arg: bool) -> Self {
        self.ff_pre_race = arg;
        self
    }

    /// Authentication token attached to destination calls.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Cancellation scope observed by every blocking step of the replay.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replay the event identified by `event_id`.
    ///
    /// Returns once all three streams are exhausted, the scope was cancelled,
    /// or a publish call failed fatally. The event is unregistered exactly
    /// once on every path past a successful registration.
    pub async fn replay(&mut self, event_id: u32) -> Result<()> {
        let mut provider_service = ProviderServiceClient::new(self.dest.clone());
        let race_state_service = RaceStateServiceClient::new(self.dest.clone());
        let local = self.cancel.child_token();

        let register_request = self.provider.event_registration(event_id);
        let registered = provider_service
            .register_event(with_api_token(register_request, self.token.as_deref()))
            .await
            .map_err(ReplayError::Register)?
            .into_inner();
        let event = registered.event.unwrap_or_default();
        info!(id = event_id, key = %event.key, event = %event.name, "replaying event");

        let sessions = SessionIndex::from_sessions(&event.sessions);
        let dest_selector = EventSelector {
            arg: Some(event_selector::Arg::Key(event.key.clone())),
        };

        let (state_tx, state_rx) = mpsc::channel(1);
        let (speedmap_tx, speedmap_rx) = mpsc::channel(1);
        let (driver_tx, driver_rx) = mpsc::channel(1);

        let feeders = vec![
            spawn_feeder(self.provider.state_source(), state_tx, local.clone()),
            spawn_feeder(self.provider.speedmap_source(), speedmap_tx, local.clone()),
            spawn_feeder(self.provider.driver_source(), driver_tx, local.clone()),
        ];

        let adapters: Vec<Box<dyn MergeCandidate>> = vec![
            Box::new(PeekableStream::new(
                state_rx,
                race_state_service.clone(),
                dest_selector.clone(),
                sessions.clone(),
                self.token.clone(),
            )),
            Box::new(PeekableStream::new(
                driver_rx,
                race_state_service.clone(),
                dest_selector.clone(),
                sessions.clone(),
                self.token.clone(),
            )),
            Box::new(PeekableStream::new(
                speedmap_rx,
                race_state_service,
                dest_selector.clone(),
                sessions,
                self.token.clone(),
            )),
        ];

        let mut live = Vec::with_capacity(adapters.len());
        for mut adapter in adapters {
            if adapter.refill().await {
                live.push(adapter);
            } else {
                debug!(stream = %adapter.kind(), "initial exhausted");
            }
        }

        let outcome = self.send_data(live, &local).await;

        local.cancel();
        for feeder in feeders {
            let _ = feeder.await;
        }

        debug!("about to unregister event");
        let unregistered = provider_service
            .unregister_event(with_api_token(
                UnregisterEventRequest {
                    event_selector: Some(dest_selector),
                },
                self.token.as_deref(),
            ))
            .await;
        debug!(key = %event.key, "event unregistered");

        outcome?;
        unregistered
            .map(|_| ())
            .map_err(ReplayError::Unregister)
    }

    /// Merge loop: repeatedly publish the record with the smallest timestamp
    /// across all live streams, pacing each publish according to the
    /// configured policy.
    async fn send_data(
        &self,
        mut candidates: Vec<Box<dyn MergeCandidate>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut pacing = Pacing::new(self.speed, self.fast_forward, self.ff_pre_race);
        let mut last_ts: Option<DateTime<Utc>> = None;

        while !candidates.is_empty() {
            if cancel.is_cancelled() {
                debug!("replay cancelled");
                return Ok(());
            }

            let mut current = 0;
            let mut next = candidates[0].stamp();
            for (idx, candidate) in candidates.iter().enumerate().skip(1) {
                let stamp = candidate.stamp();
                if stamp.ts < next.ts {
                    next = stamp;
                    current = idx;
                }
            }

            pacing.arm(next.ts);

            if let Some(last) = last_ts {
                let wait = pacing.wait_for(next.ts, last, next.session_type);
                if !wait.is_zero() {
                    debug!(time = %next.ts, wait_ms = wait.as_millis() as u64, "sleeping");
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = cancel.cancelled() => {
                            debug!("sleep interrupted by cancellation");
                            return Ok(());
                        }
                    }
                }
            }
            last_ts = Some(next.ts);

            let published = tokio::select! {
                result = candidates[current].publish() => result,
                _ = cancel.cancelled() => {
                    debug!("publish interrupted by cancellation");
                    return Ok(());
                }
            };
            if let Err(status) = published {
                match status.code() {
                    Code::DeadlineExceeded | Code::Cancelled | Code::Aborted => {
                        debug!(code = ?status.code(), "publish ended by cancellation");
                        return Ok(());
                    }
                    _ => {
                        let kind = candidates[current].kind();
                        error!(stream = %kind, error = %status, "error publishing data");
                        return Err(ReplayError::Publish {
                            kind,
                            source: status,
                        });
                    }
                }
            }

            let refilled = tokio::select! {
                refilled = candidates[current].refill() => refilled,
                _ = cancel.cancelled() => {
                    debug!("refill interrupted by cancellation");
                    return Ok(());
                }
            };
            if !refilled {
                debug!(stream = %candidates[current].kind(), "exhausted");
                candidates.remove(current);
            }
        }

        debug!("all streams exhausted");
        Ok(())
    }
}

/// Continuously pulls records from `source` into the bounded queue, stopping
/// on exhaustion or cancellation. Dropping the sender closes the queue and
/// signals exhaustion to the merge side.
fn spawn_feeder<T: ReplayRecord>(
    mut source: Box<dyn RecordSource<T>>,
    queue: mpsc::Sender<T>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                item = source.next() => item,
                _ = cancel.cancelled() => {
                    debug!(stream = %T::kind(), "feeder cancelled");
                    return;
                }
            };
            let Some(item) = item else {
                debug!(stream = %T::kind(), "no more data");
                return;
            };
            tokio::select! {
                sent = queue.send(item) => {
                    if sent.is_err() {
                        debug!(stream = %T::kind(), "queue receiver dropped");
                        return;
                    }
                }
                _ = cancel.cancelled() => {
                    debug!(stream = %T::kind(), "feeder cancelled");
                    return;
                }
            }
        }
    })
}
