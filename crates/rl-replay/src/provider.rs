//! ---
//! rl_section: "03-replay-engine"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Replay pipeline publishing recorded events with original pacing."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tonic::transport::Channel;
use tonic::Status;
use tracing::debug;
use uuid::Uuid;

use rl_proto::common::v1::{event_selector, start_selector, EventSelector, StartSelector};
use rl_proto::provider::v1::RegisterEventRequest;
use rl_proto::racestate::v1::race_state_service_client::RaceStateServiceClient;
use rl_proto::racestate::v1::{
    GetDriverDataRequest, GetSpeedmapsRequest, GetStatesRequest, PublishDriverDataRequest,
    PublishSpeedmapRequest, PublishStateRequest,
};

use crate::fetcher::{Page, PageLoader, PagedFetcher, RecordSource};
use crate::record::{datetime_to_timestamp, timestamp_to_datetime, StreamKind};

/// Supplies the replay task with the event registration descriptor and the
/// three telemetry streams of the recorded event.
pub trait ReplayDataProvider: Send + 'static {
    /// Descriptor used to register the event with the destination. A missing
    /// key is replaced with a freshly generated one.
    fn event_registration(&mut self, event_id: u32) -> RegisterEventRequest;

    fn state_source(&mut self) -> Box<dyn RecordSource<PublishStateRequest>>;
    fn speedmap_source(&mut self) -> Box<dyn RecordSource<PublishSpeedmapRequest>>;
    fn driver_source(&mut self) -> Box<dyn RecordSource<PublishDriverDataRequest>>;
}

/// Builds the registration descriptor for a replay.
pub type RegisterRequestFn = Box<dyn FnMut(u32) -> RegisterEventRequest + Send>;

/// [`ReplayDataProvider`] backed by a source server's read API.
pub struct GrpcDataProvider {
    source: Channel,
    event_id: u32,
    page_size: i32,
    register_request: RegisterRequestFn,
}

impl GrpcDataProvider {
    pub fn new(
        source: Channel,
        event_id: u32,
        register_request: impl FnMut(u32) -> RegisterEventRequest + Send + 'static,
    ) -> Self {
        Self {
            source,
            event_id,
            page_size: 100,
            register_request: Box::new(register_request),
        }
    }

    /// Number of records fetched per page.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    fn client(&self) -> RaceStateServiceClient<Channel> {
        RaceStateServiceClient::new(self.source.clone())
    }
}

impl ReplayDataProvider for GrpcDataProvider {
    fn event_registration(&mut self, event_id: u32) -> RegisterEventRequest {
        let mut request = (self.register_request)(event_id);
        if request.key.is_empty() {
            request.key = Uuid::new_v4().to_string();
            debug!(key = %request.key, "generated event key");
        }
        if let Some(event) = request.event.as_mut() {
            event.key = request.key.clone();
        }
        request
    }

    fn state_source(&mut self) -> Box<dyn RecordSource<PublishStateRequest>> {
        Box::new(PagedFetcher::new(
            StreamKind::State,
            Box::new(StatePageLoader {
                client: self.client(),
                event: selector_by_id(self.event_id),
                limit: self.page_size,
            }),
        ))
    }

    fn speedmap_source(&mut self) -> Box<dyn RecordSource<PublishSpeedmapRequest>> {
        Box::new(PagedFetcher::new(
            StreamKind::Speedmap,
            Box::new(SpeedmapPageLoader {
                client: self.client(),
                event: selector_by_id(self.event_id),
                limit: self.page_size,
            }),
        ))
    }

    fn driver_source(&mut self) -> Box<dyn RecordSource<PublishDriverDataRequest>> {
        Box::new(PagedFetcher::new(
            StreamKind::DriverData,
            Box::new(DriverPageLoader {
                client: self.client(),
                event: selector_by_id(self.event_id),
                limit: self.page_size,
            }),
        ))
    }
}

struct StatePageLoader {
    client: RaceStateServiceClient<Channel>,
    event: EventSelector,
    limit: i32,
}

#[async_trait]
impl PageLoader<PublishStateRequest> for StatePageLoader {
    async fn load_page(
        &mut self,
        start: DateTime<Utc>,
    ) -> std::result::Result<Page<PublishStateRequest>, Status> {
        let request = GetStatesRequest {
            event: Some(self.event.clone()),
            start: Some(start_selector_at(start)),
            num: self.limit,
        };
        let response = self.client.get_states(request).await?.into_inner();
        Ok(Page {
            records: response.states,
            last_ts: response.last_ts.as_ref().and_then(timestamp_to_datetime),
        })
    }
}

struct SpeedmapPageLoader {
    client: RaceStateServiceClient<Channel>,
    event: EventSelector,
    limit: i32,
}

#[async_trait]
impl PageLoader<PublishSpeedmapRequest> for SpeedmapPageLoader {
    async fn load_page(
        &mut self,
        start: DateTime<Utc>,
    ) -> std::result::Result<Page<PublishSpeedmapRequest>, Status> {
        let request = GetSpeedmapsRequest {
            event: Some(self.event.clone()),
            start: Some(start_selector_at(start)),
            num: self.limit,
        };
        let response = self.client.get_speedmaps(request).await?.into_inner();
        Ok(Page {
            records: response.speedmaps,
            last_ts: response.last_ts.as_ref().and_then(timestamp_to_datetime),
        })
    }
}

struct DriverPageLoader {
    client: RaceStateServiceClient<Channel>,
    event: EventSelector,
    limit: i32,
}

#[async_trait]
impl PageLoader<PublishDriverDataRequest> for DriverPageLoader {
    async fn load_page(
        &mut self,
        start: DateTime<Utc>,
    ) -> std::result::Result<Page<PublishDriverDataRequest>, Status> {
        let request = GetDriverDataRequest {
            event: Some(self.event.clone()),
            start: Some(start_selector_at(start)),
            num: self.limit,
        };
        let response = self.client.get_driver_data(request).await?.into_inner();
        Ok(Page {
            records: response.driver_data,
            last_ts: response.last_ts.as_ref().and_then(timestamp_to_datetime),
        })
    }
}

fn selector_by_id(event_id: u32) -> EventSelector {
    EventSelector {
        arg: Some(event_selector::Arg::Id(event_id as i32)),
    }
}

fn start_selector_at(start: DateTime<Utc>) -> StartSelector {
    StartSelector {
        arg: Some(start_selector::Arg::RecordStamp(datetime_to_timestamp(
            start,
        ))),
    }
}
