//! The fetch adapter boundary
//!
//! All network access goes through a [`FetchAdapter`]. The adapter never
//! retries; retry policy belongs to the coordinator (see [`super::Retrying`]).

use crate::fetch::{FetchFailure, RequestDescriptor, Response};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// Default number of concurrent fetches for [`FetchAdapter::fetch_many`]
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Result of a single fetch
pub type FetchResult = Result<Response, FetchFailure>;

/// Contract over the external scraping service
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    /// Fetches a single descriptor
    ///
    /// With `cache = true` an implementation may return a stored response
    /// for an identical descriptor; with `cache = false` it must reissue
    /// the upstream request. An exceeded `timeout_ms` yields a timeout
    /// failure.
    async fn fetch(&self, desc: &RequestDescriptor) -> FetchResult;

    /// Fetches many descriptors with at most `concurrency` in flight
    ///
    /// Items are yielded as they complete, tagged with their input index.
    /// Dropping the stream drops every in-flight fetch.
    fn fetch_many<'a>(
        &'a self,
        descs: Vec<RequestDescriptor>,
        concurrency: usize,
    ) -> BoxStream<'a, (usize, FetchResult)> {
        stream::iter(descs.into_iter().enumerate())
            .map(move |(index, desc)| async move {
                let result = self.fetch(&desc).await;
                (index, result)
            })
            .buffer_unordered(concurrency.max(1))
            .boxed()
    }
}
