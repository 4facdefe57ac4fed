//! Integration tests for the scrape coordinator
//!
//! These tests drive full scrapes against an in-memory fetch adapter with
//! canned pages, injected failures and artificial delays.

mod common;

use common::{items, listing_html, page_url, pages_of, StubAdapter};
use futures::StreamExt;
use paged_sweep::extract::{API_JSON, SEARCH_LISTING};
use paged_sweep::fetch::{FailureKind, FetchFailure, FetchOptions, RetryPolicy};
use paged_sweep::scrape::{PageStatus, ScrapePhase};
use paged_sweep::{
    Coordinator, PageCaps, PageUrlBuilder, RequestDescriptor, ScrapeRequest, ScrapeSettings,
    SweepError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const SEED: &str = "https://shop.example/search?q=lamp";

fn listing_request(caps: PageCaps) -> ScrapeRequest {
    ScrapeRequest::new(RequestDescriptor::parse(SEED).unwrap(), SEARCH_LISTING).with_caps(caps)
}

/// `pages` listing pages of `page_size` items each
fn listing_site(pages: usize, page_size: usize) -> StubAdapter {
    let total = pages * page_size;
    let mut adapter = StubAdapter::new().html(SEED, listing_html(1, page_size, page_size, total));
    for n in 2..=pages {
        adapter = adapter.html(&page_url(SEED, n), listing_html(n, page_size, page_size, total));
    }
    adapter
}

#[tokio::test]
async fn test_two_page_listing() {
    let adapter = Arc::new(
        StubAdapter::new()
            .html(SEED, listing_html(1, 20, 20, 35))
            .html(&page_url(SEED, 2), listing_html(2, 15, 20, 35)),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert_eq!(outcome.records.len(), 35);
    assert_eq!(outcome.page_count(), 2);
    assert!(outcome.is_complete());
    assert!(!outcome.is_fatal());
    assert_eq!(outcome.phase, ScrapePhase::Done);
    assert_eq!(outcome.records_for_page(1).len(), 15);
    assert_eq!(adapter.calls(), vec![SEED.to_string(), page_url(SEED, 2)]);
}

#[tokio::test]
async fn test_cap_below_total() {
    let adapter = Arc::new(
        StubAdapter::new()
            .html(SEED, listing_html(1, 20, 20, 35))
            .html(&page_url(SEED, 2), listing_html(2, 15, 20, 35)),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let outcome = coordinator
        .scrape(listing_request(PageCaps::new().with_max_pages(1)))
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 20);
    assert_eq!(outcome.page_count(), 1);
    assert_eq!(adapter.calls_to(&page_url(SEED, 2)), 0);
}

#[tokio::test]
async fn test_max_items_rounds_up_to_pages() {
    let adapter = Arc::new(listing_site(6, 10));
    let coordinator = Coordinator::new(adapter.clone());

    let outcome = coordinator
        .scrape(listing_request(PageCaps::new().with_max_items(25)))
        .await
        .unwrap();

    assert_eq!(outcome.page_count(), 3);
    assert_eq!(outcome.records.len(), 30);
    assert_eq!(adapter.calls().len(), 3);
}

#[tokio::test]
async fn test_first_page_failure_is_fatal() {
    let adapter = Arc::new(
        listing_site(3, 10).failing(SEED, FetchFailure::transport("Connection refused")),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert!(outcome.is_fatal());
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.page_count(), 1);
    assert_eq!(
        outcome.pages[0].status.failure_kind(),
        Some(FailureKind::Transport)
    );
    assert_eq!(outcome.phase, ScrapePhase::Done);
    assert_eq!(adapter.calls(), vec![SEED.to_string()]);
}

#[tokio::test]
async fn test_one_blocked_page() {
    let blocked = page_url(SEED, 3);
    let adapter = Arc::new(
        listing_site(5, 4).failing(&blocked, FetchFailure::blocked("captcha").with_retryable(false)),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert!(!outcome.is_fatal());
    assert_eq!(outcome.page_count(), 5);
    assert_eq!(pages_of(&outcome.records), vec![1, 1, 1, 1, 2, 2, 2, 2, 4, 4, 4, 4, 5, 5, 5, 5]);
    assert_eq!(
        outcome.pages[2].status,
        PageStatus::failed(FailureKind::Blocked, "captcha")
    );
    assert_eq!(outcome.pages[2].records, 0);
    assert_eq!(adapter.calls_to(&blocked), 1);
}

#[tokio::test]
async fn test_cursor_pagination() {
    let seed = "https://api.shop.example/items?limit=2";
    let adapter = Arc::new(
        StubAdapter::new()
            .json(seed, json!({ "items": items(1, 2), "nextCursor": "c1" }))
            .json(
                &format!("{}&cursor=c1", seed),
                json!({ "items": items(2, 2), "nextCursor": "c2" }),
            )
            .json(&format!("{}&cursor=c2", seed), json!({ "items": items(3, 1) })),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let request = ScrapeRequest::new(RequestDescriptor::parse(seed).unwrap(), API_JSON)
        .with_caps(PageCaps::new().with_max_pages(10))
        .with_paging(PageUrlBuilder::cursor("cursor"));
    let outcome = coordinator.scrape(request).await.unwrap();

    assert_eq!(adapter.calls().len(), 3);
    assert_eq!(outcome.page_count(), 3);
    assert_eq!(pages_of(&outcome.records), vec![1, 1, 2, 2, 3]);
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn test_cursor_chain_ends_on_failure() {
    let seed = "https://api.shop.example/items?limit=2";
    let adapter = Arc::new(
        StubAdapter::new()
            .json(seed, json!({ "items": items(1, 2), "nextCursor": "c1" }))
            .failing(
                &format!("{}&cursor=c1", seed),
                FetchFailure::service("Internal error"),
            ),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let request = ScrapeRequest::new(RequestDescriptor::parse(seed).unwrap(), API_JSON)
        .with_caps(PageCaps::new().with_max_pages(10))
        .with_paging(PageUrlBuilder::cursor("cursor"));
    let outcome = coordinator.scrape(request).await.unwrap();

    assert_eq!(outcome.page_count(), 2);
    assert_eq!(
        outcome.pages[1].status.failure_kind(),
        Some(FailureKind::Service)
    );
    assert_eq!(outcome.records.len(), 2);
}

#[tokio::test]
async fn test_cancellation_mid_dispatch() {
    let token = CancellationToken::new();
    let mut adapter = listing_site(11, 2);
    for n in 2..=11 {
        adapter = adapter.delay(&page_url(SEED, n), 30);
    }
    // Seed plus four follow-up pages
    let adapter = Arc::new(adapter.cancel_after(5, token.clone()));
    let settings = ScrapeSettings {
        concurrency: 2,
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(adapter.clone()).with_settings(settings);

    let outcome = coordinator
        .scrape_with_cancel(listing_request(PageCaps::new()), token)
        .await
        .unwrap();

    assert_eq!(outcome.phase, ScrapePhase::Cancelled);
    assert!(!outcome.is_fatal());
    assert_eq!(outcome.page_count(), 11);
    assert!(outcome.pages[0].status.is_ok());

    let filled = outcome.pages[1..].iter().filter(|p| p.status.is_ok()).count();
    assert!(filled <= 5, "{} follow-up pages filled", filled);
    for page in outcome.pages[1..].iter().filter(|p| !p.status.is_ok()) {
        assert_eq!(page.status.failure_kind(), Some(FailureKind::Cancelled));
    }

    assert_eq!(outcome.records.len(), 2 * (filled + 1));
    let pages = pages_of(&outcome.records);
    assert!(pages.windows(2).all(|w| w[0] <= w[1]));
    assert!(adapter.calls().len() <= 7);
}

#[tokio::test]
async fn test_order_independent_of_completion() {
    let mut adapter = listing_site(6, 3);
    for n in 2..=6 {
        adapter = adapter.delay(&page_url(SEED, n), 80 - 10 * n as u64);
    }
    let adapter = Arc::new(adapter);
    let coordinator = Coordinator::new(adapter.clone());

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert_eq!(
        pages_of(&outcome.records),
        vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 5, 6, 6, 6]
    );
    for (index, page) in outcome.pages.iter().enumerate() {
        assert_eq!(page.index, index);
        assert!(outcome
            .records_for_page(index)
            .iter()
            .all(|r| r["page"] == json!(index + 1)));
    }
}

#[tokio::test]
async fn test_concurrency_bounded() {
    let mut adapter = listing_site(13, 1);
    for n in 2..=13 {
        adapter = adapter.delay(&page_url(SEED, n), 15);
    }
    let adapter = Arc::new(adapter);
    let settings = ScrapeSettings {
        concurrency: 3,
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(adapter.clone()).with_settings(settings);

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert_eq!(outcome.page_count(), 13);
    assert!(outcome.is_complete());
    assert!(adapter.peak_in_flight() <= 3);
}

#[tokio::test]
async fn test_cached_scrapes_are_identical() {
    let adapter = Arc::new(listing_site(3, 5));
    let coordinator = Coordinator::new(adapter.clone());
    let options = FetchOptions {
        cache: true,
        ..FetchOptions::default()
    };
    let request = || {
        ScrapeRequest::new(
            RequestDescriptor::parse(SEED).unwrap().with_options(options.clone()),
            SEARCH_LISTING,
        )
    };

    let first = coordinator.scrape(request()).await.unwrap();
    let second = coordinator.scrape(request()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(adapter.calls().len(), 6);
    assert_eq!(adapter.upstream_calls(), 3);
}

#[tokio::test]
async fn test_uncached_scrapes_reissue() {
    let adapter = Arc::new(listing_site(3, 5));
    let coordinator = Coordinator::new(adapter.clone());

    coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();
    coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert_eq!(adapter.upstream_calls(), 6);
}

#[tokio::test]
async fn test_deadline_times_out_outstanding_pages() {
    let slow = page_url(SEED, 3);
    let adapter = Arc::new(listing_site(4, 2).delay(&slow, 2_000));
    let settings = ScrapeSettings {
        deadline: Some(Duration::from_millis(300)),
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(adapter).with_settings(settings);

    let started = Instant::now();
    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(outcome.phase, ScrapePhase::Done);
    assert_eq!(outcome.page_count(), 4);
    assert_eq!(
        outcome.pages[2].status,
        PageStatus::failed(FailureKind::Timeout, "scrape deadline exceeded")
    );
    assert!(outcome.pages[1].status.is_ok());
    assert!(outcome.pages[3].status.is_ok());
    assert_eq!(pages_of(&outcome.records), vec![1, 1, 2, 2, 4, 4]);
}

#[tokio::test]
async fn test_retry_policy_applies_per_page() {
    let flaky = page_url(SEED, 2);
    let blocked = page_url(SEED, 3);
    let adapter = Arc::new(
        listing_site(3, 2)
            .flaky(&flaky, 2, FetchFailure::transport("Connection reset"))
            .failing(&blocked, FetchFailure::blocked("captcha")),
    );
    let settings = ScrapeSettings {
        retry: Some(RetryPolicy {
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..RetryPolicy::with_attempts(3)
        }),
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(adapter.clone()).with_settings(settings);

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert!(outcome.pages[1].status.is_ok());
    assert_eq!(adapter.calls_to(&flaky), 3);
    assert_eq!(
        outcome.pages[2].status.failure_kind(),
        Some(FailureKind::Blocked)
    );
    assert_eq!(adapter.calls_to(&blocked), 1);
}

#[tokio::test]
async fn test_no_retry_by_default() {
    let flaky = page_url(SEED, 2);
    let adapter = Arc::new(
        listing_site(2, 2).flaky(&flaky, 1, FetchFailure::transport("Connection reset")),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert_eq!(
        outcome.pages[1].status.failure_kind(),
        Some(FailureKind::Transport)
    );
    assert_eq!(adapter.calls_to(&flaky), 1);
}

#[tokio::test]
async fn test_empty_follow_up_page_is_parse_empty() {
    let adapter = Arc::new(
        listing_site(3, 2).html(&page_url(SEED, 2), "<html><body>Sorry</body></html>".to_string()),
    );
    let coordinator = Coordinator::new(adapter);

    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert!(!outcome.is_fatal());
    assert_eq!(
        outcome.pages[1].status.failure_kind(),
        Some(FailureKind::ParseEmpty)
    );
    assert_eq!(pages_of(&outcome.records), vec![1, 1, 3, 3]);
}

#[tokio::test]
async fn test_stream_yields_in_page_order() {
    let mut adapter = listing_site(4, 2);
    for n in 2..=4 {
        adapter = adapter.delay(&page_url(SEED, n), 60 - 15 * n as u64);
    }
    let coordinator = Coordinator::new(Arc::new(adapter));

    let mut stream = coordinator
        .scrape_stream(listing_request(PageCaps::new()))
        .unwrap();
    let mut records = Vec::new();
    while let Some(record) = stream.next().await {
        records.push(record);
    }
    let outcome = stream.finish().await.unwrap();

    assert_eq!(pages_of(&records), vec![1, 1, 2, 2, 3, 3, 4, 4]);
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.page_count(), 4);
    assert_eq!(outcome.record_count(), 8);
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn test_stream_finish_without_consuming() {
    let coordinator = Coordinator::new(Arc::new(listing_site(3, 2)));
    let settings = ScrapeSettings {
        stream_buffer: 1,
        ..ScrapeSettings::default()
    };
    let coordinator = coordinator.with_settings(settings);

    let stream = coordinator
        .scrape_stream(listing_request(PageCaps::new()))
        .unwrap();
    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.phase, ScrapePhase::Done);
    assert_eq!(outcome.record_count(), 6);
}

#[tokio::test]
async fn test_unknown_target_type() {
    let adapter = Arc::new(listing_site(2, 2));

    let result = paged_sweep::scrape(
        adapter.clone(),
        SEED,
        "not_a_target",
        PageCaps::new(),
        FetchOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SweepError::UnknownTargetType(_))));
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn test_top_level_scrape() {
    let adapter = Arc::new(listing_site(3, 4));

    let outcome = paged_sweep::scrape(
        adapter,
        SEED,
        SEARCH_LISTING,
        PageCaps::new().with_max_pages(2),
        FetchOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.page_count(), 2);
    assert_eq!(outcome.records.len(), 8);
}

#[tokio::test]
async fn test_stream_drop_cancels_scrape() {
    let mut adapter = listing_site(10, 2);
    for n in 2..=10 {
        adapter = adapter.delay(&page_url(SEED, n), 40);
    }
    let adapter = Arc::new(adapter);
    let settings = ScrapeSettings {
        concurrency: 2,
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(adapter.clone()).with_settings(settings);

    let mut stream = coordinator
        .scrape_stream(listing_request(PageCaps::new()))
        .unwrap();
    assert!(stream.next().await.is_some());
    drop(stream);

    let issued = adapter.calls().len();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(adapter.calls().len(), issued);
    assert!(issued < 10, "{} pages requested", issued);
}

#[tokio::test]
async fn test_stream_cancel_returns_cancelled_outcome() {
    let mut adapter = listing_site(10, 2);
    for n in 2..=10 {
        adapter = adapter.delay(&page_url(SEED, n), 40);
    }
    let settings = ScrapeSettings {
        concurrency: 2,
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(Arc::new(adapter)).with_settings(settings);

    let mut stream = coordinator
        .scrape_stream(listing_request(PageCaps::new()))
        .unwrap();
    assert!(stream.next().await.is_some());
    stream.cancel();
    let outcome = stream.finish().await.unwrap();

    assert_eq!(outcome.phase, ScrapePhase::Cancelled);
    assert!(outcome.pages[0].status.is_ok());
    assert!(outcome
        .pages
        .iter()
        .any(|p| p.status.failure_kind() == Some(FailureKind::Cancelled)));
}

#[tokio::test]
async fn test_deadline_during_seed_is_fatal() {
    let adapter = Arc::new(listing_site(3, 2).delay(SEED, 2_000));
    let settings = ScrapeSettings {
        deadline: Some(Duration::from_millis(200)),
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(adapter.clone()).with_settings(settings);

    let started = Instant::now();
    let outcome = coordinator.scrape(listing_request(PageCaps::new())).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert!(outcome.is_fatal());
    assert_eq!(outcome.phase, ScrapePhase::Done);
    assert_eq!(outcome.page_count(), 1);
    assert_eq!(
        outcome.pages[0].status.failure_kind(),
        Some(FailureKind::Timeout)
    );
    assert!(outcome.records.is_empty());
    assert_eq!(adapter.calls(), vec![SEED.to_string()]);
}

#[tokio::test]
async fn test_deadline_during_cursor_walk() {
    let seed = "https://api.shop.example/items?limit=2";
    let slow = format!("{}&cursor=c1", seed);
    let adapter = Arc::new(
        StubAdapter::new()
            .json(seed, json!({ "items": items(1, 2), "nextCursor": "c1" }))
            .json(&slow, json!({ "items": items(2, 2), "nextCursor": "c2" }))
            .delay(&slow, 2_000),
    );
    let settings = ScrapeSettings {
        deadline: Some(Duration::from_millis(300)),
        ..ScrapeSettings::default()
    };
    let coordinator = Coordinator::new(adapter.clone()).with_settings(settings);

    let request = ScrapeRequest::new(RequestDescriptor::parse(seed).unwrap(), API_JSON)
        .with_caps(PageCaps::new().with_max_pages(10))
        .with_paging(PageUrlBuilder::cursor("cursor"));
    let started = Instant::now();
    let outcome = coordinator.scrape(request).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert!(!outcome.is_fatal());
    assert_eq!(outcome.phase, ScrapePhase::Done);
    assert_eq!(outcome.page_count(), 2);
    assert_eq!(
        outcome.pages[1].status,
        PageStatus::failed(FailureKind::Timeout, "scrape deadline exceeded")
    );
    assert_eq!(pages_of(&outcome.records), vec![1, 1]);
    assert_eq!(adapter.calls_to(&format!("{}&cursor=c2", seed)), 0);
}

#[tokio::test]
async fn test_cancellation_during_cursor_walk() {
    let seed = "https://api.shop.example/items?limit=2";
    let token = CancellationToken::new();
    let adapter = Arc::new(
        StubAdapter::new()
            .json(seed, json!({ "items": items(1, 2), "nextCursor": "c1" }))
            .json(
                &format!("{}&cursor=c1", seed),
                json!({ "items": items(2, 2), "nextCursor": "c2" }),
            )
            .json(&format!("{}&cursor=c2", seed), json!({ "items": items(3, 2) }))
            .cancel_after(2, token.clone()),
    );
    let coordinator = Coordinator::new(adapter.clone());

    let request = ScrapeRequest::new(RequestDescriptor::parse(seed).unwrap(), API_JSON)
        .with_caps(PageCaps::new().with_max_pages(10))
        .with_paging(PageUrlBuilder::cursor("cursor"));
    let outcome = coordinator.scrape_with_cancel(request, token).await.unwrap();

    assert_eq!(outcome.phase, ScrapePhase::Cancelled);
    assert!(!outcome.is_fatal());
    assert_eq!(pages_of(&outcome.records), vec![1, 1, 2, 2]);
    assert_eq!(adapter.calls_to(&format!("{}&cursor=c2", seed)), 0);
}

#[tokio::test]
async fn test_oversized_page_size_stops_offset_paging() {
    let seed = "https://api.shop.example/items?start=0";
    let adapter = Arc::new(StubAdapter::new().json(
        seed,
        json!({ "items": [{ "id": 1 }], "totalPages": 3, "limit": u64::MAX }),
    ));
    let coordinator = Coordinator::new(adapter.clone());

    let request = ScrapeRequest::new(RequestDescriptor::parse(seed).unwrap(), API_JSON)
        .with_paging(PageUrlBuilder::offset("start"));
    let outcome = coordinator.scrape(request).await.unwrap();

    assert!(!outcome.is_fatal());
    assert!(outcome.is_complete());
    assert_eq!(outcome.page_count(), 1);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(adapter.calls().len(), 1);
}
