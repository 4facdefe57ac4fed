//! Scrape coordinator - paginated concurrent scrape orchestration
//!
//! This module contains the scrape loop that coordinates:
//! - Fetching and parsing the seed page
//! - Planning the follow-up pages from the seed's metadata
//! - Bounded-concurrency dispatch of a fixed plan, or sequential cursor walks
//! - Slot-ordered accumulation of records and per-page statuses
//! - Deadline expiry and caller cancellation

use crate::extract::{Extractor, ExtractorRegistry, PageMeta, RegistryEntry};
use crate::fetch::{
    FailureKind, FetchAdapter, FetchFailure, FetchResult, RequestDescriptor, Response,
    RetryPolicy, Retrying, DEFAULT_CONCURRENCY,
};
use crate::pagination::{
    plan, CursorPlanner, PageCaps, PageUrlBuilder, Pagination, ScrapePlan, DEFAULT_PAGE_CEILING,
};
use crate::scrape::sink::ResultSink;
use crate::scrape::{PageReport, PageStatus, ScrapeOutcome, ScrapePhase, ScrapeStream};
use crate::{Result, SweepError};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_STREAM_BUFFER: usize = 64;

/// Coordinator behavior for every scrape it runs
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Maximum number of fetches in flight
    pub concurrency: usize,

    /// Hard upper bound on pages per scrape, seed included
    pub page_ceiling: usize,

    /// Opt-in retry policy; `None` means every failure is final
    pub retry: Option<RetryPolicy>,

    /// Deadline for the whole scrape call
    pub deadline: Option<Duration>,

    /// Records buffered between a streaming scrape and its consumer
    pub stream_buffer: usize,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_ceiling: DEFAULT_PAGE_CEILING,
            retry: None,
            deadline: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

/// One scrape invocation
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub seed: RequestDescriptor,

    /// Registered target type selecting the extractor
    pub target: String,

    pub caps: PageCaps,

    /// Page-URL policy overriding the registry's choice for this target
    pub paging: Option<PageUrlBuilder>,
}

impl ScrapeRequest {
    pub fn new(seed: RequestDescriptor, target: impl Into<String>) -> Self {
        Self {
            seed,
            target: target.into(),
            caps: PageCaps::default(),
            paging: None,
        }
    }

    pub fn with_caps(mut self, caps: PageCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_paging(mut self, paging: PageUrlBuilder) -> Self {
        self.paging = Some(paging);
        self
    }
}

/// Main scrape coordinator structure
///
/// Holds the fetch adapter, the extractor registry and the settings. The
/// coordinator itself carries no per-scrape state and can run any number
/// of scrapes, concurrently or in sequence.
pub struct Coordinator<A: ?Sized> {
    adapter: Arc<A>,
    registry: Arc<ExtractorRegistry>,
    settings: ScrapeSettings,
}

impl<A: ?Sized> Clone for Coordinator<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            registry: Arc::clone(&self.registry),
            settings: self.settings.clone(),
        }
    }
}

impl<A> Coordinator<A>
where
    A: FetchAdapter + ?Sized + 'static,
{
    /// Creates a coordinator with the built-in extractors and default settings
    pub fn new(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            registry: Arc::new(ExtractorRegistry::with_defaults()),
            settings: ScrapeSettings::default(),
        }
    }

    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_settings(mut self, settings: ScrapeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Runs a scrape to completion
    ///
    /// # Returns
    ///
    /// * `Ok(ScrapeOutcome)` - Every page settled; check `fatal` before
    ///   reading an empty outcome as "no results"
    /// * `Err(SweepError::UnknownTargetType)` - The target type is not
    ///   registered; nothing was fetched
    pub async fn scrape(&self, request: ScrapeRequest) -> Result<ScrapeOutcome> {
        self.scrape_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Runs a scrape that stops early once `token` is cancelled
    ///
    /// Pages settled before cancellation keep their records; every other
    /// page is reported as cancelled.
    pub async fn scrape_with_cancel(
        &self,
        request: ScrapeRequest,
        token: CancellationToken,
    ) -> Result<ScrapeOutcome> {
        let entry = self.resolve(&request)?;
        Ok(self
            .run(request, entry, token, ResultSink::collecting())
            .await)
    }

    /// Starts a scrape on its own task and streams its records in page order
    ///
    /// Must be called within a tokio runtime.
    pub fn scrape_stream(&self, request: ScrapeRequest) -> Result<ScrapeStream> {
        let entry = self.resolve(&request)?;
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let token = CancellationToken::new();

        let coordinator = self.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            coordinator
                .run(request, entry, run_token, ResultSink::streaming(tx))
                .await
        });

        Ok(ScrapeStream::new(rx, handle, token))
    }

    /// Looks up the extractor and page policy for the request
    fn resolve(&self, request: &ScrapeRequest) -> Result<RegistryEntry> {
        let mut entry = self
            .registry
            .get(&request.target)
            .cloned()
            .ok_or_else(|| {
                tracing::error!(
                    "Unknown target type '{}' (registered: {})",
                    request.target,
                    self.registry.target_types().join(", ")
                );
                SweepError::UnknownTargetType(request.target.clone())
            })?;

        if let Some(paging) = &request.paging {
            entry.paging = paging.clone();
        }
        Ok(entry)
    }

    async fn run(
        &self,
        request: ScrapeRequest,
        entry: RegistryEntry,
        token: CancellationToken,
        sink: ResultSink,
    ) -> ScrapeOutcome {
        let deadline = self.settings.deadline.map(|limit| Instant::now() + limit);
        let fetcher = Retrying::new(&*self.adapter, self.settings.retry.as_ref(), deadline);
        let guard = Guard {
            token: &token,
            deadline,
        };
        let mut state = RunState::new(sink);

        tracing::info!("Scraping {} as {}", request.seed.url(), request.target);

        // Seed page
        let seed = state.open(&request.seed);
        let first = match guard.run(fetcher.fetch(&request.seed)).await {
            Ok(Ok(response)) => {
                state.transition(ScrapePhase::FirstFetched);
                state.parse(seed, &response, entry.extract)
            }
            Ok(Err(failure)) => {
                tracing::warn!(
                    "Seed page {} failed, nothing else will be fetched: {}",
                    request.seed.url(),
                    failure
                );
                state.fail(seed, failure.into());
                return state.finish_fatal();
            }
            Err(Interrupt::Deadline) => {
                tracing::warn!("Scrape deadline passed before the seed page settled");
                state.fail(seed, deadline_status());
                return state.finish_fatal();
            }
            Err(Interrupt::Cancelled) => return state.finish_cancelled(),
        };

        if !state.flush(&guard).await {
            return state.finish_cancelled();
        }

        // Planning
        state.transition(ScrapePhase::Planning);
        let pagination = plan(
            &request.seed,
            &first,
            &request.caps,
            &entry.paging,
            self.settings.page_ceiling,
        );

        if pagination.is_empty() {
            tracing::info!("No follow-up pages planned for {}", request.seed.url());
            state.transition(ScrapePhase::Done);
            return state.finish().await;
        }

        state.transition(ScrapePhase::Dispatching);
        let interrupt = match pagination {
            Pagination::Planned(plan) => {
                self.dispatch_planned(&fetcher, plan, entry.extract, &guard, &mut state)
                    .await
            }
            Pagination::Cursor(planner) => {
                self.dispatch_cursor(&fetcher, planner, entry.extract, &guard, &mut state)
                    .await
            }
        };

        match interrupt {
            Some(Interrupt::Cancelled) => state.finish_cancelled(),
            Some(Interrupt::Deadline) => {
                let expired = state.abandon(deadline_status());
                tracing::warn!(
                    "Scrape deadline passed; {} outstanding pages marked as timed out",
                    expired
                );
                state.transition(ScrapePhase::Draining);
                state.transition(ScrapePhase::Done);
                state.finish().await
            }
            None => {
                state.transition(ScrapePhase::Draining);
                state.transition(ScrapePhase::Done);
                state.finish().await
            }
        }
    }

    /// Dispatches a fixed plan through `fetch_many`
    ///
    /// Completions are parsed one at a time as they arrive. Dropping the
    /// completion stream on interruption drops every in-flight fetch.
    async fn dispatch_planned<F>(
        &self,
        fetcher: &F,
        plan: ScrapePlan,
        extract: Extractor,
        guard: &Guard<'_>,
        state: &mut RunState,
    ) -> Option<Interrupt>
    where
        F: FetchAdapter + ?Sized,
    {
        let total = plan.len();
        let concurrency = self.settings.concurrency.max(1);
        tracing::info!(
            "Dispatching {} follow-up pages with concurrency {}",
            total,
            concurrency
        );

        // Plan index i lives in slot i + 1
        let slots: Vec<usize> = plan
            .descriptors()
            .iter()
            .map(|desc| state.open(desc))
            .collect();

        let mut completions = fetcher.fetch_many(plan.into_descriptors(), concurrency);
        let mut settled = 0;

        loop {
            let (index, result) = match guard.run(completions.next()).await {
                Ok(Some(completion)) => completion,
                Ok(None) => return None,
                Err(interrupt) => return Some(interrupt),
            };

            state.settle(slots[index], result, extract);
            settled += 1;

            if settled + concurrency >= total {
                state.transition(ScrapePhase::Draining);
            }

            if !state.flush(guard).await {
                return Some(Interrupt::Cancelled);
            }
        }
    }

    /// Walks a cursor chain one page at a time
    async fn dispatch_cursor<F>(
        &self,
        fetcher: &F,
        mut planner: CursorPlanner,
        extract: Extractor,
        guard: &Guard<'_>,
        state: &mut RunState,
    ) -> Option<Interrupt>
    where
        F: FetchAdapter + ?Sized,
    {
        tracing::info!(
            "Following cursor pages (at most {} pages in total)",
            planner.limit()
        );

        while let Some(desc) = planner.next_descriptor() {
            let slot = state.open(&desc);

            match guard.run(fetcher.fetch(&desc)).await {
                Ok(result) => match state.settle(slot, result, extract) {
                    Some(meta) => planner.advance(&meta),
                    None => planner.stop(),
                },
                Err(interrupt) => return Some(interrupt),
            }

            if !state.flush(guard).await {
                return Some(Interrupt::Cancelled);
            }
        }

        None
    }
}

/// Why a scrape stopped before every page settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Deadline,
}

/// Races work against cancellation and the scrape deadline
struct Guard<'a> {
    token: &'a CancellationToken,
    deadline: Option<Instant>,
}

impl Guard<'_> {
    /// Runs `work` unless the scrape is interrupted first
    ///
    /// Cancellation wins over the deadline, and both win over work that
    /// is ready at the same time.
    async fn run<T>(&self, work: impl Future<Output = T>) -> std::result::Result<T, Interrupt> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupt::Cancelled),
            _ = deadline_reached(self.deadline) => Err(Interrupt::Deadline),
            output = work => Ok(output),
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn deadline_status() -> PageStatus {
    PageStatus::failed(FailureKind::Timeout, "scrape deadline exceeded")
}

/// Per-page bookkeeping before the outcome is assembled
struct PageSlot {
    url: String,
    status: Option<PageStatus>,
    records: usize,
}

/// State owned by a single scrape call
struct RunState {
    sink: ResultSink,
    pages: Vec<PageSlot>,
    phase: ScrapePhase,
}

impl RunState {
    fn new(sink: ResultSink) -> Self {
        Self {
            sink,
            pages: Vec::new(),
            phase: ScrapePhase::Fresh,
        }
    }

    /// Reserves the slot for the next page
    fn open(&mut self, desc: &RequestDescriptor) -> usize {
        let index = self.sink.reserve();
        self.pages.push(PageSlot {
            url: desc.url().to_string(),
            status: None,
            records: 0,
        });
        index
    }

    fn transition(&mut self, next: ScrapePhase) {
        if self.phase == next {
            return;
        }
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal scrape transition {} -> {}",
            self.phase,
            next
        );
        tracing::trace!("Scrape phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    /// Parses a fetched page into its slot and returns its metadata
    fn parse(&mut self, index: usize, response: &Response, extract: Extractor) -> PageMeta {
        let extraction = extract(response);
        let count = extraction.records.len();

        let status = if count == 0 {
            tracing::warn!("No records extracted from {}", response.final_url());
            PageStatus::failed(
                FailureKind::ParseEmpty,
                format!("no records extracted from {}", response.final_url()),
            )
        } else {
            tracing::debug!("Extracted {} records from {}", count, response.final_url());
            PageStatus::Ok
        };

        if let Some(page) = self.pages.get_mut(index) {
            page.status = Some(status);
            page.records = count;
        }
        self.sink.fill(index, extraction.records);
        extraction.meta
    }

    /// Settles a slot from a fetch result; `None` when the fetch failed
    fn settle(
        &mut self,
        index: usize,
        result: FetchResult,
        extract: Extractor,
    ) -> Option<PageMeta> {
        match result {
            Ok(response) => Some(self.parse(index, &response, extract)),
            Err(failure) => {
                self.fail_page(index, failure);
                None
            }
        }
    }

    fn fail_page(&mut self, index: usize, failure: FetchFailure) {
        let url = self.pages.get(index).map(|p| p.url.as_str()).unwrap_or("");
        tracing::warn!("Page {} ({}) failed: {}", index, url, failure);
        self.fail(index, failure.into());
    }

    fn fail(&mut self, index: usize, status: PageStatus) {
        if let Some(page) = self.pages.get_mut(index) {
            page.status = Some(status);
            page.records = 0;
        }
        self.sink.fill(index, Vec::new());
    }

    /// Marks every unsettled slot with `status`; returns how many
    fn abandon(&mut self, status: PageStatus) -> usize {
        let open: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.status.is_none())
            .map(|(index, _)| index)
            .collect();

        for index in &open {
            self.fail(*index, status.clone());
        }
        open.len()
    }

    /// Releases ready records unless the scrape is interrupted
    ///
    /// Returns `false` when the scrape must stop: cancellation, or a
    /// streaming consumer that went away.
    async fn flush(&mut self, guard: &Guard<'_>) -> bool {
        match guard.run(self.sink.flush()).await {
            Ok(open) => open,
            Err(Interrupt::Cancelled) => false,
            // Records stay in their slots; the deadline is handled by the caller's next wait
            Err(Interrupt::Deadline) => true,
        }
    }

    fn finish_cancelled(mut self) -> ScrapeOutcome {
        let status = PageStatus::failed(FailureKind::Cancelled, "scrape cancelled");
        let cancelled = self.abandon(status);
        tracing::info!("Scrape cancelled; {} pages left unfinished", cancelled);
        self.transition(ScrapePhase::Cancelled);
        self.into_outcome(false)
    }

    fn finish_fatal(mut self) -> ScrapeOutcome {
        self.transition(ScrapePhase::Done);
        self.into_outcome(true)
    }

    async fn finish(mut self) -> ScrapeOutcome {
        // Streaming consumers may still be waiting for the last pages
        self.sink.flush().await;
        if !self.sink.is_drained() {
            tracing::debug!("Record consumer went away before every page was released");
        }
        let outcome = self.into_outcome(false);
        tracing::info!(
            "Scrape finished: {} pages, {} records, {} failed pages",
            outcome.page_count(),
            outcome.record_count(),
            outcome.failures().count()
        );
        outcome
    }

    fn into_outcome(self, fatal: bool) -> ScrapeOutcome {
        let pages = self
            .pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| PageReport {
                index,
                url: page.url,
                status: page
                    .status
                    .unwrap_or_else(|| PageStatus::failed(FailureKind::Cancelled, "never settled")),
                records: page.records,
            })
            .collect();

        ScrapeOutcome {
            records: self.sink.collect(),
            pages,
            fatal,
            phase: self.phase,
        }
    }
}
