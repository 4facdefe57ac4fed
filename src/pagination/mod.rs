//! Pagination planner
//!
//! From the seed page's [`PageMeta`] and the caller's [`PageCaps`], the
//! planner decides which pages follow the seed. Page-number and offset
//! policies produce a fixed [`ScrapePlan`]; cursor policies produce a lazy
//! [`CursorPlanner`].
//!
//! The page count is `N = min(total_pages, max_pages, ceil(max_items / page_size), ceiling)`
//! and the plan holds exactly `N - 1` descriptors. An unknown total with no
//! `max_pages` plans nothing, except for cursor chains, where the cursor
//! itself proves the next page exists.

mod builder;
mod cursor;

pub use builder::{with_query_param, PageUrlBuilder};
pub use cursor::CursorPlanner;

use crate::extract::PageMeta;
use crate::fetch::RequestDescriptor;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Hard upper bound on pages per scrape, seed included
pub const DEFAULT_PAGE_CEILING: usize = 50;

/// Caller-supplied limits for one scrape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCaps {
    pub max_pages: Option<NonZeroUsize>,
    pub max_items: Option<NonZeroUsize>,
}

impl PageCaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of pages; zero means no cap
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = NonZeroUsize::new(max_pages);
        self
    }

    /// Caps the number of records, rounded up to whole pages; zero means no cap
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = NonZeroUsize::new(max_items);
        self
    }
}

/// Ordered, immutable descriptors for pages 2..N
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapePlan {
    descriptors: Vec<RequestDescriptor>,
}

impl ScrapePlan {
    pub fn new(descriptors: Vec<RequestDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[RequestDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<RequestDescriptor> {
        self.descriptors
    }
}

/// What follows the seed page
#[derive(Debug, Clone)]
pub enum Pagination {
    Planned(ScrapePlan),
    Cursor(CursorPlanner),
}

impl Pagination {
    /// Whether no page follows the seed
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Planned(plan) => plan.is_empty(),
            Self::Cursor(planner) => !planner.has_next(),
        }
    }
}

/// Number of pages to scrape, seed included
///
/// With `open_ended` set an unknown total does not stop the count; only
/// the caps and the ceiling bound it.
pub fn page_limit(meta: &PageMeta, caps: &PageCaps, ceiling: usize, open_ended: bool) -> usize {
    if meta.page_size == Some(0) {
        return 1;
    }

    let mut limit = ceiling.max(1);

    match meta.total_pages {
        Some(total) => limit = limit.min(total),
        None if !open_ended && caps.max_pages.is_none() => return 1,
        None => {}
    }

    if let Some(max_pages) = caps.max_pages {
        limit = limit.min(max_pages.get());
    }

    if let (Some(max_items), Some(page_size)) = (caps.max_items, meta.page_size) {
        limit = limit.min(max_items.get().div_ceil(page_size));
    }

    limit
}

/// Plans the pages following `seed`
///
/// Every planned descriptor keeps the seed's method, body, headers and
/// options; only the URL changes. A policy that cannot address a page
/// (offset without a page size) yields an empty plan.
pub fn plan(
    seed: &RequestDescriptor,
    first: &PageMeta,
    caps: &PageCaps,
    builder: &PageUrlBuilder,
    ceiling: usize,
) -> Pagination {
    if builder.is_cursor() {
        let limit = page_limit(first, caps, ceiling, true);
        return Pagination::Cursor(CursorPlanner::new(
            seed.clone(),
            builder.clone(),
            limit,
            first.next_page_cursor.clone(),
        ));
    }

    let limit = page_limit(first, caps, ceiling, false);
    let mut descriptors = Vec::with_capacity(limit.saturating_sub(1));

    for page in 2..=limit {
        match builder.page_url(seed.url(), page, first.page_size) {
            Some(url) => descriptors.push(seed.for_url(url)),
            None => {
                tracing::debug!(
                    "Page {} of {} cannot be addressed; planning no follow-up pages",
                    page,
                    seed.url()
                );
                return Pagination::Planned(ScrapePlan::default());
            }
        }
    }

    Pagination::Planned(ScrapePlan::new(descriptors))
}
