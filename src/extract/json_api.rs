use crate::extract::{first_count, records_from_array, ExtractionResult, PageMeta};
use crate::fetch::Response;
use serde_json::Value;

const RECORD_KEYS: &[&str] = &["results", "data", "items"];
const PAGE_SIZE_KEYS: &[&str] = &["pageSize", "page_size", "per_page", "limit"];
const TOTAL_PAGE_KEYS: &[&str] = &["totalPages", "total_pages"];
const TOTAL_RESULT_KEYS: &[&str] = &["total", "totalResults", "total_results", "count"];
const CURSOR_KEYS: &[&str] = &["next_cursor", "nextCursor"];

/// Extracts records from a raw JSON response
///
/// Records are read from the first array found at `results`, `data` or
/// `items` (or the root itself when it is an array). Pagination keys are
/// looked up on the root and then on a nested `meta` or `pagination` object.
/// A cursor is taken from `next_cursor`/`nextCursor`, or from
/// `pageInfo.endCursor` when `pageInfo.hasNextPage` is true.
pub fn api_json(response: &Response) -> ExtractionResult {
    let Some(root) = response.json() else {
        return ExtractionResult::empty();
    };

    let items = match &root {
        Value::Array(items) => items,
        Value::Object(_) => match RECORD_KEYS
            .iter()
            .find_map(|key| root.get(*key).and_then(Value::as_array))
        {
            Some(items) => items,
            None => return ExtractionResult::empty(),
        },
        _ => return ExtractionResult::empty(),
    };

    let records = records_from_array(items);
    let scopes = [
        Some(&root),
        root.get("meta").filter(|v| v.is_object()),
        root.get("pagination").filter(|v| v.is_object()),
    ];
    let lookup = |keys: &[&str]| scopes.iter().flatten().find_map(|scope| first_count(scope, keys));

    let page_size = lookup(PAGE_SIZE_KEYS).or_else(|| Some(records.len()).filter(|n| *n > 0));
    let total_pages = lookup(TOTAL_PAGE_KEYS);
    let total_results = lookup(TOTAL_RESULT_KEYS);

    let meta = match (total_pages, total_results, page_size) {
        (Some(pages), _, _) => PageMeta {
            total_pages: Some(pages),
            page_size,
            next_page_cursor: None,
        },
        (None, Some(total), Some(size)) => PageMeta::from_totals(total, size),
        _ => PageMeta {
            total_pages: None,
            page_size,
            next_page_cursor: None,
        },
    };

    ExtractionResult::new(records, meta.with_cursor(cursor(&scopes)))
}

fn cursor(scopes: &[Option<&Value>]) -> Option<String> {
    for scope in scopes.iter().flatten() {
        if let Some(cursor) = CURSOR_KEYS
            .iter()
            .find_map(|key| scope.get(*key).and_then(Value::as_str))
        {
            return Some(cursor.to_string()).filter(|c| !c.is_empty());
        }

        if let Some(page_info) = scope.get("pageInfo") {
            let has_next = page_info
                .get("hasNextPage")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if has_next {
                return page_info
                    .get("endCursor")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
    }
    None
}
