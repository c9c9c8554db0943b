//! ---
//! rl_section: "03-replay-engine"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Replay pipeline publishing recorded events with original pacing."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
//! Integration tests running the replay engine against an in-process mock
//! destination server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::DateTime;
use prost_types::Timestamp;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::TcpIncoming;
use tonic::transport::{Channel, Endpoint, Server};
use tonic::{Code, Request, Response, Status};

use rl_proto::common::v1::{event_selector, SessionType};
use rl_proto::event::v1::{Event, Session};
use rl_proto::provider::v1::provider_service_server::{ProviderService, ProviderServiceServer};
use rl_proto::provider::v1::{
    RegisterEventRequest, RegisterEventResponse, UnregisterEventRequest, UnregisterEventResponse,
};
use rl_proto::racestate::v1::race_state_service_server::{
    RaceStateService, RaceStateServiceServer,
};
use rl_proto::racestate::v1::{
    GetDriverDataRequest, GetDriverDataResponse, GetSpeedmapsRequest, GetSpeedmapsResponse,
    GetStatesRequest, GetStatesResponse, PublishDriverDataRequest, PublishDriverDataResponse,
    PublishSpeedmapRequest, PublishSpeedmapResponse, PublishStateRequest, PublishStateResponse,
    SessionState,
};
use rl_replay::{RecordSource, ReplayDataProvider, ReplayError, ReplayTask};

const EVENT_KEY: &str = "replay-test";
const BASE_MS: i64 = 1_600_000_000_000;

fn ts(offset_ms: i64) -> Timestamp {
    let dt = DateTime::from_timestamp_millis(BASE_MS + offset_ms).unwrap();
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

#[derive(Debug, Clone)]
struct Published {
    kind: &'static str,
    offset_ms: i64,
    selector_key: Option<String>,
    token: Option<String>,
    at: Instant,
}

#[derive(Default)]
struct Recorded {
    publishes: Mutex<Vec<Published>>,
    register_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
    register_token: Mutex<Option<String>>,
}

impl Recorded {
    fn publishes(&self) -> Vec<Published> {
        self.publishes.lock().unwrap().clone()
    }

    fn offsets(&self) -> Vec<i64> {
        self.publishes().iter().map(|p| p.offset_ms).collect()
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.publishes().iter().map(|p| p.kind).collect()
    }
}

#[derive(Default, Clone)]
struct DestBehavior {
    publish_failure: Option<Code>,
    register_failure: bool,
}

struct DestHarness {
    channel: Channel,
    recorded: Arc<Recorded>,
    _server: JoinHandle<()>,
}

async fn start_dest(behavior: DestBehavior) -> DestHarness {
    let recorded = Arc::new(Recorded::default());
    let provider_svc = MockProviderService {
        recorded: recorded.clone(),
        behavior: behavior.clone(),
    };
    let race_state_svc = MockRaceStateService {
        recorded: recorded.clone(),
        behavior,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = TcpIncoming::from_listener(listener, true, None).unwrap();
    let server = tokio::spawn(async move {
        Server::builder()
            .add_service(ProviderServiceServer::new(provider_svc))
            .add_service(RaceStateServiceServer::new(race_state_svc))
            .serve_with_incoming(incoming)
            .await
            .ok();
    });

    let channel = Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();

    DestHarness {
        channel,
        recorded,
        _server: server,
    }
}

fn metadata_token<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get("api-token")
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

struct MockProviderService {
    recorded: Arc<Recorded>,
    behavior: DestBehavior,
}

#[tonic::async_trait]
impl ProviderService for MockProviderService {
    async fn register_event(
        &self,
        request: Request<RegisterEventRequest>,
    ) -> Result<Response<RegisterEventResponse>, Status> {
        self.recorded.register_calls.fetch_add(1, Ordering::SeqCst);
        *self.recorded.register_token.lock().unwrap() = metadata_token(&request);
        if self.behavior.register_failure {
            return Err(Status::permission_denied("registration rejected"));
        }
        let request = request.into_inner();
        let mut event = request.event.unwrap_or_default();
        if event.key.is_empty() {
            event.key = request.key;
        }
        Ok(Response::new(RegisterEventResponse {
            event: Some(event),
            track: request.track,
        }))
    }

    async fn unregister_event(
        &self,
        _request: Request<UnregisterEventRequest>,
    ) -> Result<Response<UnregisterEventResponse>, Status> {
        self.recorded
            .unregister_calls
            .fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(UnregisterEventResponse {}))
    }
}

struct MockRaceStateService {
    recorded: Arc<Recorded>,
    behavior: DestBehavior,
}

impl MockRaceStateService {
    fn record<T>(
        &self,
        kind: &'static str,
        request: &Request<T>,
        timestamp: Option<&Timestamp>,
        selector_key: Option<String>,
    ) -> Result<(), Status> {
        if let Some(code) = self.behavior.publish_failure {
            return Err(Status::new(code, "publish rejected"));
        }
        let offset_ms = timestamp
            .map(|ts| ts.seconds * 1000 + i64::from(ts.nanos) / 1_000_000 - BASE_MS)
            .unwrap_or(i64::MIN);
        self.recorded.publishes.lock().unwrap().push(Published {
            kind,
            offset_ms,
            selector_key,
            token: metadata_token(request),
            at: Instant::now(),
        });
        Ok(())
    }
}

fn selector_key(selector: &Option<rl_proto::common::v1::EventSelector>) -> Option<String> {
    match selector.as_ref().and_then(|s| s.arg.as_ref()) {
        Some(event_selector::Arg::Key(key)) => Some(key.clone()),
        _ => None,
    }
}

#[tonic::async_trait]
impl RaceStateService for MockRaceStateService {
    async fn publish_state(
        &self,
        request: Request<PublishStateRequest>,
    ) -> Result<Response<PublishStateResponse>, Status> {
        let key = selector_key(&request.get_ref().event);
        self.record("state", &request, request.get_ref().timestamp.as_ref(), key)?;
        Ok(Response::new(PublishStateResponse {}))
    }

    async fn publish_speedmap(
        &self,
        request: Request<PublishSpeedmapRequest>,
    ) -> Result<Response<PublishSpeedmapResponse>, Status> {
        let key = selector_key(&request.get_ref().event);
        self.record(
            "speedmap",
            &request,
            request.get_ref().timestamp.as_ref(),
            key,
        )?;
        Ok(Response::new(PublishSpeedmapResponse {}))
    }

    async fn publish_driver_data(
        &self,
        request: Request<PublishDriverDataRequest>,
    ) -> Result<Response<PublishDriverDataResponse>, Status> {
        let key = selector_key(&request.get_ref().event);
        self.record(
            "driver",
            &request,
            request.get_ref().timestamp.as_ref(),
            key,
        )?;
        Ok(Response::new(PublishDriverDataResponse {}))
    }

    async fn get_states(
        &self,
        _request: Request<GetStatesRequest>,
    ) -> Result<Response<GetStatesResponse>, Status> {
        Err(Status::unimplemented("read API not mocked here"))
    }

    async fn get_speedmaps(
        &self,
        _request: Request<GetSpeedmapsRequest>,
    ) -> Result<Response<GetSpeedmapsResponse>, Status> {
        Err(Status::unimplemented("read API not mocked here"))
    }

    async fn get_driver_data(
        &self,
        _request: Request<GetDriverDataRequest>,
    ) -> Result<Response<GetDriverDataResponse>, Status> {
        Err(Status::unimplemented("read API not mocked here"))
    }
}

struct VecSource<T> {
    items: VecDeque<T>,
}

#[async_trait]
impl<T: Send + 'static> RecordSource<T> for VecSource<T> {
    async fn next(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

/// Provider serving pre-scripted streams; the registered event carries the
/// session list the engine builds its session-type lookup from.
struct ScriptedProvider {
    states: Vec<PublishStateRequest>,
    speedmaps: Vec<PublishSpeedmapRequest>,
    drivers: Vec<PublishDriverDataRequest>,
    sessions: Vec<Session>,
}

impl ScriptedProvider {
    fn new(sessions: Vec<Session>) -> Self {
        Self {
            states: Vec::new(),
            speedmaps: Vec::new(),
            drivers: Vec::new(),
            sessions,
        }
    }

    fn race_only() -> Self {
        Self::new(vec![Session {
            num: 0,
            name: "RACE".to_owned(),
            r#type: SessionType::Race as i32,
        }])
    }

    fn practice_only() -> Self {
        Self::new(vec![Session {
            num: 0,
            name: "PRACTICE".to_owned(),
            r#type: SessionType::Practice as i32,
        }])
    }

    fn with_states(mut self, offsets_ms: &[i64]) -> Self {
        self.states = offsets_ms
            .iter()
            .map(|offset| PublishStateRequest {
                timestamp: Some(ts(*offset)),
                session: Some(SessionState {
                    session_num: 0,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        self
    }

    fn with_speedmaps(mut self, offsets_ms: &[i64]) -> Self {
        self.speedmaps = offsets_ms
            .iter()
            .map(|offset| PublishSpeedmapRequest {
                timestamp: Some(ts(*offset)),
                ..Default::default()
            })
            .collect();
        self
    }

    fn with_drivers(mut self, offsets_ms: &[i64]) -> Self {
        self.drivers = offsets_ms
            .iter()
            .map(|offset| PublishDriverDataRequest {
                timestamp: Some(ts(*offset)),
                session_num: 0,
                ..Default::default()
            })
            .collect();
        self
    }
}

impl ReplayDataProvider for ScriptedProvider {
    fn event_registration(&mut self, event_id: u32) -> RegisterEventRequest {
        RegisterEventRequest {
            key: EVENT_KEY.to_owned(),
            event: Some(Event {
                id: event_id,
                key: EVENT_KEY.to_owned(),
                name: "scripted event".to_owned(),
                sessions: self.sessions.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn state_source(&mut self) -> Box<dyn RecordSource<PublishStateRequest>> {
        Box::new(VecSource {
            items: std::mem::take(&mut self.states).into(),
        })
    }

    fn speedmap_source(&mut self) -> Box<dyn RecordSource<PublishSpeedmapRequest>> {
        Box::new(VecSource {
            items: std::mem::take(&mut self.speedmaps).into(),
        })
    }

    fn driver_source(&mut self) -> Box<dyn RecordSource<PublishDriverDataRequest>> {
        Box::new(VecSource {
            items: std::mem::take(&mut self.drivers).into(),
        })
    }
}

#[tokio::test]
async fn merges_streams_in_timestamp_order() {
    let dest = start_dest(DestBehavior::default()).await;
    let provider = ScriptedProvider::race_only()
        .with_states(&[0, 2000, 4000])
        .with_speedmaps(&[1000, 3000])
        .with_drivers(&[500]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider).with_speed(0);
    task.replay(1).await.expect("replay succeeds");

    assert_eq!(dest.recorded.offsets(), vec![0, 500, 1000, 2000, 3000, 4000]);
    assert_eq!(
        dest.recorded.kinds(),
        vec!["state", "driver", "speedmap", "state", "speedmap", "state"]
    );
    for published in dest.recorded.publishes() {
        assert_eq!(published.selector_key.as_deref(), Some(EVENT_KEY));
    }
    assert_eq!(dest.recorded.unregister_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_stream_does_not_block_the_replay() {
    let dest = start_dest(DestBehavior::default()).await;
    let provider = ScriptedProvider::race_only()
        .with_speedmaps(&[0, 100])
        .with_drivers(&[50]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider).with_speed(0);
    task.replay(1).await.expect("replay succeeds");

    assert_eq!(dest.recorded.offsets(), vec![0, 50, 100]);
    assert_eq!(dest.recorded.unregister_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pacing_scales_the_original_gaps() {
    let dest = start_dest(DestBehavior::default()).await;
    let provider = ScriptedProvider::race_only().with_states(&[0, 1000]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider).with_speed(2);
    let started = Instant::now();
    task.replay(1).await.expect("replay succeeds");
    let elapsed = started.elapsed();

    // 1000ms gap replayed at speed 2 => ~500ms, with scheduler jitter slack
    assert!(elapsed >= Duration::from_millis(400), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(950), "elapsed {elapsed:?}");

    let publishes = dest.recorded.publishes();
    let gap = publishes[1].at.duration_since(publishes[0].at);
    assert!(gap >= Duration::from_millis(400), "gap {gap:?}");
}

#[tokio::test]
async fn fast_forward_window_replays_instantly() {
    let dest = start_dest(DestBehavior::default()).await;
    let provider = ScriptedProvider::race_only().with_states(&[0, 300, 600]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider)
        .with_speed(1)
        .with_fast_forward(Duration::from_secs(1));
    let started = Instant::now();
    task.replay(1).await.expect("replay succeeds");
    let elapsed = started.elapsed();

    assert_eq!(dest.recorded.offsets(), vec![0, 300, 600]);
    assert!(elapsed < Duration::from_millis(300), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn pre_race_records_never_sleep() {
    let dest = start_dest(DestBehavior::default()).await;
    let provider = ScriptedProvider::practice_only().with_drivers(&[0, 3000]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider)
        .with_speed(1)
        .with_fast_forward_pre_race(true);
    let started = Instant::now();
    task.replay(1).await.expect("replay succeeds");
    let elapsed = started.elapsed();

    assert_eq!(dest.recorded.offsets(), vec![0, 3000]);
    assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn cancellation_stops_the_replay_and_unregisters() {
    let dest = start_dest(DestBehavior::default()).await;
    let offsets: Vec<i64> = (0..100).map(|i| i * 1000).collect();
    let provider = ScriptedProvider::race_only().with_states(&offsets);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let mut task = ReplayTask::new(dest.channel.clone(), provider)
        .with_speed(1)
        .with_cancellation(cancel);
    let started = Instant::now();
    task.replay(1).await.expect("cancelled replay ends cleanly");
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(dest.recorded.publishes().len() < offsets.len());
    assert_eq!(dest.recorded.unregister_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fatal_publish_error_still_unregisters() {
    let dest = start_dest(DestBehavior {
        publish_failure: Some(Code::Internal),
        ..Default::default()
    })
    .await;
    let provider = ScriptedProvider::race_only().with_states(&[0, 1000]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider).with_speed(0);
    let result = task.replay(1).await;

    assert!(matches!(result, Err(ReplayError::Publish { .. })));
    assert_eq!(dest.recorded.unregister_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_class_publish_status_ends_cleanly() {
    let dest = start_dest(DestBehavior {
        publish_failure: Some(Code::DeadlineExceeded),
        ..Default::default()
    })
    .await;
    let provider = ScriptedProvider::race_only().with_states(&[0, 1000]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider).with_speed(0);
    task.replay(1).await.expect("treated as clean termination");
    assert_eq!(dest.recorded.unregister_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn registration_failure_returns_immediately() {
    let dest = start_dest(DestBehavior {
        register_failure: true,
        ..Default::default()
    })
    .await;
    let provider = ScriptedProvider::race_only().with_states(&[0]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider).with_speed(0);
    let result = task.replay(1).await;

    assert!(matches!(result, Err(ReplayError::Register(_))));
    assert!(dest.recorded.publishes().is_empty());
    assert_eq!(dest.recorded.unregister_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn api_token_is_attached_to_destination_calls() {
    let dest = start_dest(DestBehavior::default()).await;
    let provider = ScriptedProvider::race_only().with_states(&[0]);

    let mut task = ReplayTask::new(dest.channel.clone(), provider)
        .with_speed(0)
        .with_token("secret");
    task.replay(1).await.expect("replay succeeds");

    assert_eq!(
        dest.recorded.register_token.lock().unwrap().as_deref(),
        Some("secret")
    );
    for published in dest.recorded.publishes() {
        assert_eq!(published.token.as_deref(), Some("secret"));
    }
}
