//! Scrape module: paginated concurrent scraping
//!
//! This module contains:
//! - The `Coordinator`, which drives a scrape from seed page to outcome
//! - The result sink reordering completions into page order
//! - Streaming access to records of a running scrape
//! - The outcome model with per-page statuses

mod coordinator;
mod outcome;
mod sink;
mod stream;

pub use coordinator::{Coordinator, ScrapeRequest, ScrapeSettings};
pub use outcome::{PageReport, PageStatus, ScrapeOutcome, ScrapePhase};
pub use sink::ResultSink;
pub use stream::ScrapeStream;

use crate::fetch::{FetchAdapter, FetchOptions, RequestDescriptor};
use crate::pagination::PageCaps;
use crate::Result;
use std::sync::Arc;

/// Scrapes `seed_url` with the built-in extractors and default settings
///
/// # Arguments
///
/// * `adapter` - Fetch adapter through which every page is requested
/// * `seed_url` - URL of the first page
/// * `target` - Registered target type, e.g. `"search_listing"`
/// * `caps` - Page and record limits
/// * `options` - Fetch options applied to every page of this scrape
///
/// # Returns
///
/// * `Ok(ScrapeOutcome)` - The scrape ran; page failures are in the outcome
/// * `Err(SweepError)` - The seed URL or the target type is invalid
pub async fn scrape<A>(
    adapter: Arc<A>,
    seed_url: &str,
    target: &str,
    caps: PageCaps,
    options: FetchOptions,
) -> Result<ScrapeOutcome>
where
    A: FetchAdapter + ?Sized + 'static,
{
    let seed = RequestDescriptor::parse(seed_url)?.with_options(options);
    let request = ScrapeRequest::new(seed, target).with_caps(caps);
    Coordinator::new(adapter).scrape(request).await
}

/// Streaming variant of [`scrape`]; records are yielded in page order
///
/// Must be called within a tokio runtime.
pub fn scrape_stream<A>(
    adapter: Arc<A>,
    seed_url: &str,
    target: &str,
    caps: PageCaps,
    options: FetchOptions,
) -> Result<ScrapeStream>
where
    A: FetchAdapter + ?Sized + 'static,
{
    let seed = RequestDescriptor::parse(seed_url)?.with_options(options);
    let request = ScrapeRequest::new(seed, target).with_caps(caps);
    Coordinator::new(adapter).scrape_stream(request)
}
