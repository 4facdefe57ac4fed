//! Extractors for data embedded in HTML script elements
//!
//! Two layouts are recognized:
//! - a state island, `window.__INITIAL_STATE__ = {...}`, inside an inline script
//! - a JSON script document, `<script id="__NEXT_DATA__">`, rooted at `/props/pageProps`

use crate::extract::{first_count, records_from_array, ExtractionResult, PageMeta};
use crate::fetch::Response;
use scraper::{Html, Selector};
use serde_json::Value;

/// Prefix of the inline script assignment holding the page state
pub const INITIAL_STATE_SENTINEL: &str = "window.__INITIAL_STATE__";

/// Extracts listing items from a state island
///
/// The first object (depth-first) holding a `pageInfo` object supplies the
/// records from its `items` array. The page count is normalized from
/// `pageInfo.totalResults` and `pageInfo.pageSize`, falling back to
/// `pageInfo.totalPages`.
pub fn search_listing(response: &Response) -> ExtractionResult {
    let Some(document) = response.document() else {
        return ExtractionResult::empty();
    };
    let Some(state) = initial_state(&document).or_else(|| next_data(&document)) else {
        return ExtractionResult::empty();
    };
    let Some(listing) = find_object_with(&state, "pageInfo") else {
        return ExtractionResult::empty();
    };
    let Some(items) = listing.get("items").and_then(Value::as_array) else {
        return ExtractionResult::empty();
    };

    let records = records_from_array(items);
    let meta = meta_from(&listing["pageInfo"], records.len());
    ExtractionResult::new(records, meta)
}

/// Extracts the single `item` object of a detail page
pub fn detail_page(response: &Response) -> ExtractionResult {
    let Some(props) = response.document().and_then(|doc| page_props(&doc)) else {
        return ExtractionResult::empty();
    };

    match props.get("item") {
        Some(Value::Object(item)) => ExtractionResult::new(
            vec![item.clone()],
            PageMeta {
                total_pages: Some(1),
                page_size: Some(1),
                next_page_cursor: None,
            },
        ),
        _ => ExtractionResult::empty(),
    }
}

/// Extracts the `reviews` array of a review page
///
/// Totals are read from `pageProps` itself or its `pagination` object.
pub fn reviews_page(response: &Response) -> ExtractionResult {
    let Some(props) = response.document().and_then(|doc| page_props(&doc)) else {
        return ExtractionResult::empty();
    };
    let Some(reviews) = props.get("reviews").and_then(Value::as_array) else {
        return ExtractionResult::empty();
    };

    let records = records_from_array(reviews);
    let totals = match props.get("pagination") {
        Some(pagination @ Value::Object(_)) => pagination,
        _ => &props,
    };
    let meta = meta_from(totals, records.len());
    ExtractionResult::new(records, meta)
}

/// Normalizes the page count from a totals object
///
/// `totalResults / pageSize` wins over a direct `totalPages`; an unknown
/// page size falls back to the number of records on the page.
fn meta_from(totals: &Value, record_count: usize) -> PageMeta {
    let page_size = first_count(totals, &["pageSize", "page_size"]);
    let total_results = first_count(totals, &["totalResults", "total_results"]);
    let total_pages = first_count(totals, &["totalPages", "total_pages"]);

    let meta = match (total_results, page_size) {
        (Some(total), Some(size)) => PageMeta::from_totals(total, size),
        _ => PageMeta {
            total_pages,
            page_size: page_size.or(Some(record_count)),
            next_page_cursor: None,
        },
    };

    let has_next = totals
        .get("hasNextPage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let cursor = totals
        .get("endCursor")
        .and_then(Value::as_str)
        .filter(|_| has_next)
        .map(str::to_string);

    meta.with_cursor(cursor)
}

/// Parses the JSON value assigned after the state sentinel
fn initial_state(document: &Html) -> Option<Value> {
    let selector = Selector::parse("script").ok()?;

    document.select(&selector).find_map(|script| {
        let text = script.text().collect::<String>();
        let start = text.find(INITIAL_STATE_SENTINEL)? + INITIAL_STATE_SENTINEL.len();
        let rest = text[start..].trim_start().strip_prefix('=')?.trim_start();

        // Only the first value matters; the script may continue after it
        serde_json::Deserializer::from_str(rest)
            .into_iter::<Value>()
            .next()?
            .ok()
            .filter(Value::is_object)
    })
}

/// Parses the `__NEXT_DATA__` script document
fn next_data(document: &Html) -> Option<Value> {
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = document.select(&selector).next()?;
    let text = script.text().collect::<String>();
    serde_json::from_str(&text).ok()
}

fn page_props(document: &Html) -> Option<Value> {
    next_data(document)?.pointer("/props/pageProps").cloned()
}

/// Depth-first search for the first object holding an object under `key`
fn find_object_with<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => {
            if matches!(map.get(key), Some(Value::Object(_))) {
                return Some(value);
            }
            map.values().find_map(|child| find_object_with(child, key))
        }
        Value::Array(items) => items.iter().find_map(|child| find_object_with(child, key)),
        _ => None,
    }
}
