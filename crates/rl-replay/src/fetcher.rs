//! ---
//! rl_section: "03-replay-engine"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Replay pipeline publishing recorded events with original pacing."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tonic::Status;
use tracing::{debug, warn};

use crate::record::StreamKind;

/// One page of records fetched from the source server.
pub struct Page<T> {
    /// Records in non-decreasing timestamp order.
    pub records: Vec<T>,
    /// Timestamp of the last record covered by this page. The fetcher resumes
    /// one time unit past this watermark.
    pub last_ts: Option<DateTime<Utc>>,
}

/// Loads successive pages of one telemetry stream.
#[async_trait]
pub trait PageLoader<T>: Send {
    async fn load_page(&mut self, start: DateTime<Utc>) -> std::result::Result<Page<T>, Status>;
}

/// Pull-one-record-at-a-time view over a telemetry stream.
#[async_trait]
pub trait RecordSource<T>: Send {
    /// The next record, or `None` once the stream is exhausted.
    async fn next(&mut self) -> Option<T>;
}

/// Serves single records from an internal page buffer, transparently fetching
/// the next page via the configured loader when the buffer runs empty.
///
/// The cursor starts at the zero timestamp and advances to one millisecond
/// past each page's watermark, so no record is ever fetched twice. An empty
/// page signals exhaustion; a failed fetch is logged and treated the same way
/// so one broken stream cannot stall a replay.
pub struct PagedFetcher<T> {
    kind: StreamKind,
    loader: Box<dyn PageLoader<T>>,
    buffer: VecDeque<T>,
    cursor: DateTime<Utc>,
    exhausted: bool,
}

impl<T: Send> PagedFetcher<T> {
    pub fn new(kind: StreamKind, loader: Box<dyn PageLoader<T>>) -> Self {
        Self {
            kind,
            loader,
            buffer: VecDeque::new(),
            cursor: DateTime::UNIX_EPOCH,
            exhausted: false,
        }
    }

    async fn fetch(&mut self) {
        match self.loader.load_page(self.cursor).await {
            Ok(page) => {
                if page.records.is_empty() {
                    debug!(stream = %self.kind, "no more pages");
                    self.exhausted = true;
                    return;
                }
                debug!(
                    stream = %self.kind,
                    count = page.records.len(),
                    start = %self.cursor,
                    last = ?page.last_ts,
                    "loaded page"
                );
                match page.last_ts {
                    Some(last) => self.cursor = last + chrono::Duration::milliseconds(1),
                    None => {
                        // without a watermark the cursor cannot advance; serve
                        // this page and stop instead of refetching it forever
                        warn!(stream = %self.kind, "page without watermark, stopping after it");
                        self.exhausted = true;
                    }
                }
                self.buffer = page.records.into();
            }
            Err(status) => {
                warn!(stream = %self.kind, error = %status, "failed to load page");
                self.exhausted = true;
            }
        }
    }
}

#[async_trait]
impl<T: Send> RecordSource<T> for PagedFetcher<T> {
    async fn next(&mut self) -> Option<T> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch().await;
        }
        self.buffer.pop_front()
    }
}
