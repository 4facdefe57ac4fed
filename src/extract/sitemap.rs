use crate::extract::{ExtractionResult, PageMeta, Record};
use crate::fetch::Response;
use flate2::read::GzDecoder;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::borrow::Cow;
use std::io::Read;

/// Extracts one record per `<sitemap>` or `<url>` entry
///
/// Gzipped bodies are decompressed first. Each record carries `loc`, the
/// entry `kind` and, when present, `lastmod`. Sitemaps are a single page.
pub fn sitemap_index(response: &Response) -> ExtractionResult {
    let Some(xml) = decoded_body(response) else {
        return ExtractionResult::empty();
    };

    let (Ok(entries), Ok(loc), Ok(lastmod)) = (
        Selector::parse("sitemap, url"),
        Selector::parse("loc"),
        Selector::parse("lastmod"),
    ) else {
        return ExtractionResult::empty();
    };

    let document = Html::parse_document(&xml);
    let records: Vec<Record> = document
        .select(&entries)
        .filter_map(|entry| {
            let location = first_text(entry, &loc)?;
            let mut record = Record::new();
            record.insert("loc".to_string(), Value::String(location));
            record.insert(
                "kind".to_string(),
                Value::String(entry.value().name().to_string()),
            );
            if let Some(modified) = first_text(entry, &lastmod) {
                record.insert("lastmod".to_string(), Value::String(modified));
            }
            Some(record)
        })
        .collect();

    if records.is_empty() {
        return ExtractionResult::empty();
    }

    let meta = PageMeta {
        total_pages: Some(1),
        page_size: Some(records.len()),
        next_page_cursor: None,
    };
    ExtractionResult::new(records, meta)
}

fn decoded_body(response: &Response) -> Option<Cow<'_, str>> {
    if !response.is_gzip() {
        return Some(response.text());
    }

    let mut xml = String::new();
    match GzDecoder::new(response.body()).read_to_string(&mut xml) {
        Ok(_) => Some(Cow::Owned(xml)),
        Err(e) => {
            tracing::debug!("Could not decompress sitemap {}: {}", response.final_url(), e);
            None
        }
    }
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}
