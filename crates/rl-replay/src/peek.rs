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
use tokio::sync::mpsc;
use tonic::transport::Channel;
use tonic::Status;
use tracing::debug;

use rl_proto::common::v1::{EventSelector, SessionType};
use rl_proto::racestate::v1::race_state_service_client::RaceStateServiceClient;

use crate::record::{far_future, ReplayRecord, SessionIndex, StreamKind};

/// Timestamp and session type of the record a stream would publish next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stamp {
    pub ts: DateTime<Utc>,
    pub session_type: SessionType,
}

/// One stream's view into the merge: peek the next record without consuming
/// it, publish it, and pull a replacement.
///
/// Used to create a global publish order across streams carrying different
/// record types.
#[async_trait]
pub(crate) trait MergeCandidate: Send {
    fn kind(&self) -> StreamKind;
    /// Stamp of the buffered record; a sentinel far in the future while no
    /// record is buffered, so the stream never wins the merge prematurely.
    fn stamp(&self) -> Stamp;
    /// Receive the next record from the feeder queue. Returns `false` once
    /// the producing stream is exhausted.
    async fn refill(&mut self) -> bool;
    /// Publish the buffered record to the destination, stamped with the
    /// destination event's selector.
    async fn publish(&mut self) -> std::result::Result<(), Status>;
}

/// Generic [`MergeCandidate`] over one record kind.
pub(crate) struct PeekableStream<T> {
    queue: mpsc::Receiver<T>,
    buffered: Option<T>,
    client: RaceStateServiceClient<Channel>,
    dest_selector: EventSelector,
    sessions: SessionIndex,
    token: Option<String>,
}

impl<T: ReplayRecord> PeekableStream<T> {
    pub(crate) fn new(
        queue: mpsc::Receiver<T>,
        client: RaceStateServiceClient<Channel>,
        dest_selector: EventSelector,
        sessions: SessionIndex,
        token: Option<String>,
    ) -> Self {
        Self {
            queue,
            buffered: None,
            client,
            dest_selector,
            sessions,
            token,
        }
    }
}

#[async_trait]
impl<T: ReplayRecord> MergeCandidate for PeekableStream<T> {
    fn kind(&self) -> StreamKind {
        T::kind()
    }

    fn stamp(&self) -> Stamp {
        match &self.buffered {
            Some(record) => Stamp {
                ts: record.timestamp().unwrap_or_else(far_future),
                session_type: record.session_type(&self.sessions),
            },
            None => Stamp {
                ts: far_future(),
                session_type: SessionType::Practice,
            },
        }
    }

    async fn refill(&mut self) -> bool {
        self.buffered = self.queue.recv().await;
        self.buffered.is_some()
    }

    async fn publish(&mut self) -> std::result::Result<(), Status> {
        let Some(mut record) = self.buffered.take() else {
            return Err(Status::failed_precondition("no record buffered"));
        };
        debug!(stream = %T::kind(), time = ?record.timestamp(), "sending data");
        record.set_event(self.dest_selector.clone());
        record.publish(&mut self.client, self.token.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::Timestamp;
    use rl_proto::racestate::v1::PublishDriverDataRequest;
    use tonic::transport::Endpoint;

    fn stream_with_queue(
        capacity: usize,
    ) -> (
        PeekableStream<PublishDriverDataRequest>,
        mpsc::Sender<PublishDriverDataRequest>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        // never dialed; publish is not exercised here
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let stream = PeekableStream::new(
            rx,
            RaceStateServiceClient::new(channel),
            EventSelector::default(),
            SessionIndex::default(),
            None,
        );
        (stream, tx)
    }

    fn driver_record(seconds: i64) -> PublishDriverDataRequest {
        PublishDriverDataRequest {
            timestamp: Some(Timestamp {
                seconds,
                nanos: 0,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unfilled_stream_reports_sentinel_stamp() {
        let (stream, _tx) = stream_with_queue(1);
        assert_eq!(stream.stamp().ts, far_future());
    }

    #[tokio::test]
    async fn refill_buffers_the_next_record() {
        let (mut stream, tx) = stream_with_queue(1);
        tx.send(driver_record(42)).await.unwrap();
        assert!(stream.refill().await);
        assert_eq!(stream.stamp().ts.timestamp(), 42);
    }

    #[tokio::test]
    async fn closed_queue_reports_exhaustion() {
        let (mut stream, tx) = stream_with_queue(1);
        drop(tx);
        assert!(!stream.refill().await);
        assert_eq!(stream.stamp().ts, far_future());
    }
}
