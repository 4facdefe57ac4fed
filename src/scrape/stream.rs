use crate::extract::Record;
use crate::scrape::ScrapeOutcome;
use crate::{Result, SweepError};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Records of a running scrape, yielded in page order
///
/// The scrape runs on its own task. Records of page `i` are yielded only
/// after every earlier page has settled. Dropping the stream cancels the
/// scrape; [`ScrapeStream::finish`] returns the per-page outcome.
pub struct ScrapeStream {
    records: ReceiverStream<Record>,
    handle: JoinHandle<ScrapeOutcome>,
    token: CancellationToken,
    guard: DropGuard,
}

impl ScrapeStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Record>,
        handle: JoinHandle<ScrapeOutcome>,
        token: CancellationToken,
    ) -> Self {
        let guard = token.clone().drop_guard();
        Self {
            records: ReceiverStream::new(rx),
            handle,
            token,
            guard,
        }
    }

    /// Cancels the scrape; records already released are still yielded
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A token that cancels this scrape, for use from other tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Discards any records not yet consumed and waits for the outcome
    ///
    /// The outcome carries page statuses only; its `records` are empty.
    pub async fn finish(self) -> Result<ScrapeOutcome> {
        let Self {
            mut records,
            handle,
            token: _,
            guard,
        } = self;

        while records.next().await.is_some() {}
        let outcome = handle
            .await
            .map_err(|e| SweepError::Task(e.to_string()))?;

        guard.disarm();
        Ok(outcome)
    }
}

impl Stream for ScrapeStream {
    type Item = Record;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.records).poll_next(cx)
    }
}
