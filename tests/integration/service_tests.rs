//! Integration tests for the scraping service client
//!
//! These tests use wiremock to stand in for the scraping service and check
//! request mapping, envelope decoding and failure classification.

mod common;

use base64::Engine;
use common::{listing_html, page_url, pages_of};
use paged_sweep::config::ServiceConfig;
use paged_sweep::extract::SEARCH_LISTING;
use paged_sweep::fetch::{FailureKind, FetchAdapter, FetchOptions, RequestDescriptor, ServiceClient};
use paged_sweep::{Coordinator, PageCaps, ScrapeRequest, SweepError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEED: &str = "https://shop.example/search?q=lamp";
const KEY: &str = "test-key";

/// Creates a service configuration pointing at the mock server
fn create_test_config(endpoint: &str) -> ServiceConfig {
    ServiceConfig {
        endpoint: format!("{}/scrape", endpoint),
        key_env: "PAGED_SWEEP_INTEGRATION_KEY".to_string(),
        connect_timeout_ms: 2_000,
        user_agent: "paged-sweep-test/1.0".to_string(),
    }
}

/// A successful service envelope for an HTML page
fn envelope(url: &str, status: u16, content: &str) -> Value {
    json!({
        "result": {
            "status_code": status,
            "url": url,
            "content": content,
            "format": "text",
            "content_type": "text/html; charset=utf-8"
        }
    })
}

fn client_for(server: &MockServer) -> ServiceClient {
    ServiceClient::new(&create_test_config(&server.uri()), KEY).unwrap()
}

#[tokio::test]
async fn test_successful_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("key", KEY))
        .and(query_param("url", SEED))
        .and(query_param("country", "de"))
        .and(query_param("render_js", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "status_code": 200,
                "url": SEED,
                "content": "<html><title>Lamps</title></html>",
                "content_type": "text/html",
                "browser_data": {
                    "xhr_call": [{ "url": "https://shop.example/api/search", "status": 200 }]
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let options = FetchOptions::from_pairs([("country", "DE"), ("render_js", "true")]).unwrap();
    let desc = RequestDescriptor::parse(SEED).unwrap().with_options(options);

    let response = client_for(&server).fetch(&desc).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.final_url(), SEED);
    assert_eq!(response.text(), "<html><title>Lamps</title></html>");
    assert_eq!(response.content_type(), Some("text/html"));
    assert_eq!(response.xhr().map(|calls| calls.len()), Some(1));
    assert_eq!(response.request(), &desc);
}

#[tokio::test]
async fn test_binary_content_is_decoded() {
    let server = MockServer::start().await;
    let bytes = [0x1f_u8, 0x8b, 0x08, 0x00, 0xff];

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "status_code": 200,
                "url": "https://shop.example/sitemap.xml.gz",
                "content": base64::engine::general_purpose::STANDARD.encode(bytes),
                "format": "binary"
            }
        })))
        .mount(&server)
        .await;

    let desc = RequestDescriptor::parse("https://shop.example/sitemap.xml.gz").unwrap();
    let response = client_for(&server).fetch(&desc).await.unwrap();

    assert_eq!(response.body(), bytes.as_slice());
    assert!(response.is_gzip());
}

#[tokio::test]
async fn test_service_errors_are_classified() {
    let cases = [
        (429, json!({ "code": "ERR::THROTTLE" }), FailureKind::Quota),
        (403, json!({}), FailureKind::Blocked),
        (
            422,
            json!({ "error": { "code": "ERR::ASP::SHIELD_PROTECTION_FAILED" } }),
            FailureKind::Blocked,
        ),
        (504, json!({}), FailureKind::Timeout),
        (502, json!({ "message": "bad gateway" }), FailureKind::Service),
    ];

    for (status, body, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/scrape"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;

        let desc = RequestDescriptor::parse(SEED).unwrap();
        let failure = client_for(&server).fetch(&desc).await.unwrap_err();

        assert_eq!(failure.kind, expected, "HTTP {}", status);
    }
}

#[tokio::test]
async fn test_upstream_status_is_bad_status() {
    let server = MockServer::start().await;
    let gone = "https://shop.example/item/404";

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(gone, 404, "Not found")))
        .mount(&server)
        .await;

    let desc = RequestDescriptor::parse(gone).unwrap();
    let failure = client_for(&server).fetch(&desc).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::BadStatus);
    assert!(failure.cause.contains("404"));
}

#[tokio::test]
async fn test_undecodable_envelope_is_service_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let desc = RequestDescriptor::parse(SEED).unwrap();
    let failure = client_for(&server).fetch(&desc).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Service);
    assert!(failure.retryable);
}

#[tokio::test]
async fn test_cached_requests_reuse_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(SEED, 200, "<p>cached</p>")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let options = FetchOptions {
        cache: true,
        ..FetchOptions::default()
    };
    let desc = RequestDescriptor::parse(SEED).unwrap().with_options(options);

    let first = client.fetch(&desc).await.unwrap();
    let second = client.fetch(&desc).await.unwrap();

    assert_eq!(first.body(), second.body());
    assert_eq!(client.cached_responses(), 1);
}

#[tokio::test]
async fn test_cleared_cache_refetches() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(SEED, 200, "<p>cached</p>")))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let options = FetchOptions {
        cache: true,
        ..FetchOptions::default()
    };
    let desc = RequestDescriptor::parse(SEED).unwrap().with_options(options);

    client.fetch(&desc).await.unwrap();
    client.clear_cache();
    assert_eq!(client.cached_responses(), 0);
    client.fetch(&desc).await.unwrap();

    assert_eq!(client.cached_responses(), 1);
}

#[tokio::test]
async fn test_uncached_requests_hit_service_each_time() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(SEED, 200, "<p>fresh</p>")))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let desc = RequestDescriptor::parse(SEED).unwrap();

    client.fetch(&desc).await.unwrap();
    client.fetch(&desc).await.unwrap();

    assert_eq!(client.cached_responses(), 0);
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(SEED, 200, "<p>late</p>"))
                .set_delay(Duration::from_millis(1_000)),
        )
        .mount(&server)
        .await;

    let options = FetchOptions {
        timeout_ms: Some(100),
        ..FetchOptions::default()
    };
    let desc = RequestDescriptor::parse(SEED).unwrap().with_options(options);
    let failure = client_for(&server).fetch(&desc).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(failure.retryable);
}

#[tokio::test]
async fn test_connection_refused_is_transport() {
    let client = ServiceClient::new(&create_test_config("http://127.0.0.1:1"), KEY).unwrap();
    let desc = RequestDescriptor::parse(SEED).unwrap();

    let failure = client.fetch(&desc).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Transport);
}

#[tokio::test]
async fn test_missing_credential() {
    let config = create_test_config("http://127.0.0.1:1");

    let result = ServiceClient::from_env(&config);

    assert!(matches!(result, Err(SweepError::MissingCredential { .. })));
}

#[tokio::test]
async fn test_scrape_through_service() {
    let server = MockServer::start().await;
    let second = page_url(SEED, 2);

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", SEED))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            SEED,
            200,
            &listing_html(1, 20, 20, 35),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", second.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            &second,
            200,
            &listing_html(2, 15, 20, 35),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = Coordinator::new(Arc::new(client_for(&server)));
    let request = ScrapeRequest::new(RequestDescriptor::parse(SEED).unwrap(), SEARCH_LISTING)
        .with_caps(PageCaps::new());

    let outcome = coordinator.scrape(request).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.records.len(), 35);
    assert_eq!(&pages_of(&outcome.records)[19..21], &[1, 2]);
}

#[tokio::test]
async fn test_scrape_with_blocked_follow_up_page() {
    let server = MockServer::start().await;
    let second = page_url(SEED, 2);

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", SEED))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            SEED,
            200,
            &listing_html(1, 10, 10, 20),
        )))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", second.as_str()))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": "ERR::ASP::BLOCKED", "message": "captcha" }
        })))
        .mount(&server)
        .await;

    let coordinator = Coordinator::new(Arc::new(client_for(&server)));
    let request = ScrapeRequest::new(RequestDescriptor::parse(SEED).unwrap(), SEARCH_LISTING);

    let outcome = coordinator.scrape(request).await.unwrap();

    assert!(!outcome.is_fatal());
    assert_eq!(outcome.records.len(), 10);
    assert_eq!(
        outcome.pages[1].status.failure_kind(),
        Some(FailureKind::Blocked)
    );
}
