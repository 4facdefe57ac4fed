//! Scrape outcome and per-call state definitions
use crate::extract::Record;
use crate::fetch::{FailureKind, FetchFailure};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a single scrape call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapePhase {
    // ===== Active States =====
    /// Nothing fetched yet
    Fresh,

    /// Seed page fetched and parsed
    FirstFetched,

    /// Computing the follow-up pages
    Planning,

    /// Follow-up pages are being dispatched
    Dispatching,

    /// Everything dispatched; waiting for the last pages to settle
    Draining,

    // ===== Terminal States =====
    /// Every page settled (including a fatal seed failure)
    Done,

    /// The caller cancelled; unfinished pages are marked cancelled
    Cancelled,
}

impl ScrapePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal transition
    ///
    /// Cancellation is reachable from every non-terminal phase.
    pub fn can_transition_to(&self, next: ScrapePhase) -> bool {
        use ScrapePhase::*;

        match (self, next) {
            (current, Cancelled) => !current.is_terminal(),
            (Fresh, FirstFetched)
            | (Fresh, Done)
            | (FirstFetched, Planning)
            | (Planning, Dispatching)
            | (Planning, Done)
            | (Dispatching, Draining)
            | (Draining, Done) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::FirstFetched => "first_fetched",
            Self::Planning => "planning",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScrapePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settled status of one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageStatus {
    Ok,
    Failed { kind: FailureKind, cause: String },
}

impl PageStatus {
    pub fn failed(kind: FailureKind, cause: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            cause: cause.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Ok => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }
}

impl From<FetchFailure> for PageStatus {
    fn from(failure: FetchFailure) -> Self {
        Self::failed(failure.kind, failure.cause)
    }
}

/// Per-page entry of the outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageReport {
    /// Page index; the seed is 0
    pub index: usize,

    pub url: String,

    #[serde(flatten)]
    pub status: PageStatus,

    /// Number of records this page contributed
    pub records: usize,
}

/// Result of one scrape call
///
/// Records are in page order, and in encounter order within a page. There
/// is exactly one [`PageReport`] per page: the seed plus every planned page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeOutcome {
    /// Collected records; empty for streaming scrapes, which hand records
    /// to the consumer instead
    pub records: Vec<Record>,

    pub pages: Vec<PageReport>,

    /// Set when the seed page failed: the outcome is empty because the
    /// site could not be reached, not because it had no data
    pub fatal: bool,

    pub phase: ScrapePhase,
}

impl ScrapeOutcome {
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase == ScrapePhase::Cancelled
    }

    /// Whether every page settled successfully
    pub fn is_complete(&self) -> bool {
        self.pages.iter().all(|page| page.status.is_ok())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total records contributed by all pages
    pub fn record_count(&self) -> usize {
        self.pages.iter().map(|page| page.records).sum()
    }

    /// Records attributed to page `index`
    ///
    /// Empty for unknown pages and for streaming outcomes.
    pub fn records_for_page(&self, index: usize) -> &[Record] {
        let Some(page) = self.pages.get(index) else {
            return &[];
        };
        let start: usize = self.pages[..index].iter().map(|p| p.records).sum();
        self.records
            .get(start..start + page.records)
            .unwrap_or(&[])
    }

    /// Pages that did not settle successfully
    pub fn failures(&self) -> impl Iterator<Item = &PageReport> {
        self.pages.iter().filter(|page| !page.status.is_ok())
    }

    /// Number of failed pages per failure kind
    pub fn failure_counts(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.failures().filter_map(|page| page.status.failure_kind()) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }
}
