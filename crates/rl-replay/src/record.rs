//! ---
//! rl_section: "03-replay-engine"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Replay pipeline publishing recorded events with original pacing."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tonic::transport::Channel;
use tonic::Status;

use rl_net::with_api_token;
use rl_proto::common::v1::{EventSelector, SessionType};
use rl_proto::event::v1::Session;
use rl_proto::racestate::v1::race_state_service_client::RaceStateServiceClient;
use rl_proto::racestate::v1::{
    PublishDriverDataRequest, PublishSpeedmapRequest, PublishStateRequest,
};

/// The three telemetry streams of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    State,
    Speedmap,
    DriverData,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::State => write!(f, "state"),
            StreamKind::Speedmap => write!(f, "speedmap"),
            StreamKind::DriverData => write!(f, "driver"),
        }
    }
}

/// Maps session numbers to their session type.
///
/// Built once per replay from the registered event's session list; unknown
/// session numbers resolve to practice so they never suppress pacing skips.
#[derive(Debug, Clone, Default)]
pub struct SessionIndex {
    types: HashMap<u32, SessionType>,
}

impl SessionIndex {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let types = sessions
            .iter()
            .map(|session| (session.num, session.r#type()))
            .collect();
        Self { types }
    }

    pub fn resolve(&self, session_num: u32) -> SessionType {
        self.types
            .get(&session_num)
            .copied()
            .unwrap_or(SessionType::Practice)
    }
}

/// Capabilities the engine needs from one telemetry record kind.
///
/// Implemented for the three publish request types so the peekable adapter
/// and the merge scheduler stay generic over the record kind.
#[async_trait]
pub trait ReplayRecord: Send + 'static {
    /// Stream this record kind belongs to.
    fn kind() -> StreamKind;

    /// Wall-clock timestamp of the record.
    fn timestamp(&self) -> Option<DateTime<Utc>>;

    /// Session type of the record, derived via the per-event lookup.
    fn session_type(&self, sessions: &SessionIndex) -> SessionType;

    /// Stamp the record with the destination event's selector.
    fn set_event(&mut self, selector: EventSelector);

    /// Send the record to the destination's matching publish RPC.
    async fn publish(
        self,
        client: &mut RaceStateServiceClient<Channel>,
        token: Option<&str>,
    ) -> std::result::Result<(), Status>;
}

#[async_trait]
impl ReplayRecord for PublishStateRequest {
    fn kind() -> StreamKind {
        StreamKind::State
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(timestamp_to_datetime)
    }

    fn session_type(&self, sessions: &SessionIndex) -> SessionType {
        let session_num = self
            .session
            .as_ref()
            .map(|session| session.session_num)
            .unwrap_or_default();
        sessions.resolve(session_num)
    }

    fn set_event(&mut self, selector: EventSelector) {
        self.event = Some(selector);
    }

    async fn publish(
        self,
        client: &mut RaceStateServiceClient<Channel>,
        token: Option<&str>,
    ) -> std::result::Result<(), Status> {
        client
            .publish_state(with_api_token(self, token))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ReplayRecord for PublishSpeedmapRequest {
    fn kind() -> StreamKind {
        StreamKind::Speedmap
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(timestamp_to_datetime)
    }

    // Speedmaps carry no session number; they only occur while cars are on
    // track, so they are paced like race data.
    fn session_type(&self, _sessions: &SessionIndex) -> SessionType {
        SessionType::Race
    }

    fn set_event(&mut self, selector: EventSelector) {
        self.event = Some(selector);
    }

    async fn publish(
        self,
        client: &mut RaceStateServiceClient<Channel>,
        token: Option<&str>,
    ) -> std::result::Result<(), Status> {
        client
            .publish_speedmap(with_api_token(self, token))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ReplayRecord for PublishDriverDataRequest {
    fn kind() -> StreamKind {
        StreamKind::DriverData
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(timestamp_to_datetime)
    }

    fn session_type(&self, sessions: &SessionIndex) -> SessionType {
        sessions.resolve(self.session_num)
    }

    fn set_event(&mut self, selector: EventSelector) {
        self.event = Some(selector);
    }

    async fn publish(
        self,
        client: &mut RaceStateServiceClient<Channel>,
        token: Option<&str>,
    ) -> std::result::Result<(), Status> {
        client
            .publish_driver_data(with_api_token(self, token))
            .await
            .map(|_| ())
    }
}

/// Convert a protobuf timestamp into a [`DateTime<Utc>`].
pub(crate) fn timestamp_to_datetime(ts: &prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, ts.nanos.clamp(0, 999_999_999) as u32)
}

/// Convert a [`DateTime<Utc>`] into a protobuf timestamp.
pub(crate) fn datetime_to_timestamp(dt: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

/// Sentinel timestamp far in the future; a stream without a buffered record
/// must never win the merge.
pub(crate) fn far_future() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(num: u32, session_type: SessionType) -> Session {
        Session {
            num,
            name: format!("session {num}"),
            r#type: session_type as i32,
        }
    }

    #[test]
    fn session_index_resolves_known_numbers() {
        let index = SessionIndex::from_sessions(&[
            session(0, SessionType::Practice),
            session(1, SessionType::Qualifying),
            session(2, SessionType::Race),
        ]);
        assert_eq!(index.resolve(0), SessionType::Practice);
        assert_eq!(index.resolve(1), SessionType::Qualifying);
        assert_eq!(index.resolve(2), SessionType::Race);
    }

    #[test]
    fn session_index_defaults_to_practice() {
        let index = SessionIndex::from_sessions(&[session(0, SessionType::Race)]);
        assert_eq!(index.resolve(99), SessionType::Practice);
        assert_eq!(SessionIndex::default().resolve(0), SessionType::Practice);
    }

    #[test]
    fn timestamp_roundtrip_keeps_millis() {
        let dt = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let ts = datetime_to_timestamp(dt);
        assert_eq!(timestamp_to_datetime(&ts), Some(dt));
    }

    #[test]
    fn speedmaps_are_paced_like_race_data() {
        let record = PublishSpeedmapRequest::default();
        assert_eq!(
            record.session_type(&SessionIndex::default()),
            SessionType::Race
        );
    }
}
