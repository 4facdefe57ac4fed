//! Response parser registry
//!
//! This module contains:
//! - The record and page metadata types produced by extractors
//! - Built-in extractors for embedded JSON islands, JSON endpoints and sitemaps
//! - `ExtractorRegistry`, mapping target-type tags to extractor functions
//!
//! Extractors are plain functions of a [`Response`]. They perform no I/O,
//! are deterministic for the same bytes, and never panic: when the expected
//! data is missing they return [`ExtractionResult::empty`].

mod embedded;
mod json_api;
mod sitemap;

pub use embedded::{detail_page, reviews_page, search_listing, INITIAL_STATE_SENTINEL};
pub use json_api::api_json;
pub use sitemap::sitemap_index;

use crate::fetch::Response;
use crate::pagination::PageUrlBuilder;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Target type for listing pages carrying an embedded state island
pub const SEARCH_LISTING: &str = "search_listing";

/// Target type for single-item pages with a JSON script document
pub const DETAIL_PAGE: &str = "detail_page";

/// Target type for paged review lists with a JSON script document
pub const REVIEWS_PAGE: &str = "reviews_page";

/// Target type for XML sitemaps and sitemap indexes, optionally gzipped
pub const SITEMAP_INDEX: &str = "sitemap_index";

/// Target type for raw JSON endpoints
pub const API_JSON: &str = "api_json";

/// An opaque key/value record; its shape is defined per site
pub type Record = serde_json::Map<String, Value>;

/// Pagination metadata read from a single page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    /// Total number of pages, when the page says so
    pub total_pages: Option<usize>,

    /// Records per page, when known
    pub page_size: Option<usize>,

    /// Opaque token addressing the next page
    pub next_page_cursor: Option<String>,
}

impl PageMeta {
    /// Metadata reported for a page whose shape did not match
    pub fn empty() -> Self {
        Self {
            total_pages: Some(1),
            page_size: Some(0),
            next_page_cursor: None,
        }
    }

    /// Derives the page count from a result total and a page size
    ///
    /// A zero page size yields [`PageMeta::empty`].
    pub fn from_totals(total_results: usize, page_size: usize) -> Self {
        if page_size == 0 {
            return Self::empty();
        }

        Self {
            total_pages: Some(total_results.div_ceil(page_size)),
            page_size: Some(page_size),
            next_page_cursor: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.next_page_cursor = cursor;
        self
    }
}

/// Records extracted from one page, in encounter order, plus its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub records: Vec<Record>,
    pub meta: PageMeta,
}

impl ExtractionResult {
    pub fn new(records: Vec<Record>, meta: PageMeta) -> Self {
        Self { records, meta }
    }

    /// The result for a shape mismatch: no records, a single empty page
    pub fn empty() -> Self {
        Self::new(Vec::new(), PageMeta::empty())
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Signature shared by every extractor
pub type Extractor = fn(&Response) -> ExtractionResult;

/// An extractor together with the page-URL policy of its site type
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub extract: Extractor,
    pub paging: PageUrlBuilder,
}

/// Mapping from target-type tag to extractor
///
/// Closed over the built-in site types and open for new registrations.
#[derive(Debug, Clone, Default)]
pub struct ExtractorRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ExtractorRegistry {
    /// Creates a registry with no entries
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in extractors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SEARCH_LISTING, search_listing, PageUrlBuilder::page());
        registry.register(DETAIL_PAGE, detail_page, PageUrlBuilder::page());
        registry.register(REVIEWS_PAGE, reviews_page, PageUrlBuilder::page());
        registry.register(SITEMAP_INDEX, sitemap_index, PageUrlBuilder::page());
        registry.register(API_JSON, api_json, PageUrlBuilder::page());
        registry
    }

    /// Adds or replaces the entry for `target`, returning the replaced one
    pub fn register(
        &mut self,
        target: impl Into<String>,
        extract: Extractor,
        paging: PageUrlBuilder,
    ) -> Option<RegistryEntry> {
        self.entries
            .insert(target.into(), RegistryEntry { extract, paging })
    }

    pub fn get(&self, target: &str) -> Option<&RegistryEntry> {
        self.entries.get(target)
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    /// Registered target types, sorted
    pub fn target_types(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        targets.sort_unstable();
        targets
    }
}

/// Reads a non-negative count from a JSON number or numeric string
pub(crate) fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First count found under any of `keys`
pub(crate) fn first_count(object: &Value, keys: &[&str]) -> Option<usize> {
    keys.iter().find_map(|key| object.get(*key).and_then(as_count))
}

/// Turns a JSON array into records, wrapping scalars as `{"value": ...}`
pub(crate) fn records_from_array(items: &[Value]) -> Vec<Record> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => map.clone(),
            other => {
                let mut record = Record::new();
                record.insert("value".to_string(), other.clone());
                record
            }
        })
        .collect()
}
