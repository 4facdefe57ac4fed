//! HTTP client for the external scraping service
//!
//! This module handles all requests to the scraping service, including:
//! - Building the HTTP client with the configured user agent
//! - Mapping descriptors and their options onto service query parameters
//! - Decoding the service's JSON envelope into a [`Response`]
//! - Classifying transport and service errors into failure kinds
//! - The bounded in-memory response cache for `cache = true`
//!
//! # Error Classification
//!
//! | Condition | Failure |
//! |-----------|---------|
//! | Connection refused, DNS failure | transport (retryable) |
//! | Client or per-request timeout | timeout (retryable) |
//! | Service HTTP 402/429, error code with `QUOTA` | quota |
//! | Service HTTP 403, error code with `BLOCKED` or `ASP` | blocked |
//! | Service HTTP 408/504 | timeout (retryable) |
//! | Service HTTP 401 | service (not retryable) |
//! | Other service errors, undecodable envelope | service (retryable) |
//! | Upstream status outside 2xx | bad_status |

use crate::config::ServiceConfig;
use crate::fetch::{
    FailureKind, FetchAdapter, FetchFailure, FetchResult, Method, RequestDescriptor, Response,
    XhrCapture,
};
use crate::SweepError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Builds an HTTP client for talking to the scraping service
///
/// # Arguments
///
/// * `config` - The service configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &ServiceConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Number of responses a client keeps for `cache = true` requests
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Fetch adapter backed by the scraping service's HTTP API
///
/// Responses to `cache = true` requests are kept in memory for the life
/// of the client, oldest evicted first once the capacity is reached.
pub struct ServiceClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    cache: Mutex<ResponseCache>,
}

/// Insertion-ordered response cache with a fixed capacity
struct ResponseCache {
    entries: HashMap<RequestDescriptor, Response>,
    order: VecDeque<RequestDescriptor>,
    capacity: usize,
}

impl ResponseCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, desc: &RequestDescriptor) -> Option<&Response> {
        self.entries.get(desc)
    }

    fn insert(&mut self, desc: RequestDescriptor, response: Response) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&desc) {
            *existing = response;
            return;
        }

        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.order.push_back(desc.clone());
        self.entries.insert(desc, response);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl ServiceClient {
    /// Creates a client with an explicit credential
    pub fn new(config: &ServiceConfig, api_key: impl Into<String>) -> Result<Self, SweepError> {
        Ok(Self {
            client: build_http_client(config)?,
            endpoint: Url::parse(&config.endpoint)?,
            api_key: api_key.into(),
            cache: Mutex::new(ResponseCache::new(DEFAULT_CACHE_CAPACITY)),
        })
    }

    /// Keeps at most `capacity` cached responses; 0 disables the cache
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        Self {
            cache: Mutex::new(ResponseCache::new(capacity)),
            ..self
        }
    }

    /// Creates a client reading the credential from the environment
    ///
    /// The variable is named by `config.key_env`. A missing or blank value
    /// is a fatal startup error.
    pub fn from_env(config: &ServiceConfig) -> Result<Self, SweepError> {
        let api_key = std::env::var(&config.key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| SweepError::MissingCredential {
                var: config.key_env.clone(),
            })?;

        Self::new(config, api_key)
    }

    /// Number of responses currently held for `cache = true` requests
    pub fn cached_responses(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Drops every cached response
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn cache_lookup(&self, desc: &RequestDescriptor) -> Option<Response> {
        self.cache.lock().ok()?.get(desc).cloned()
    }

    fn cache_store(&self, response: &Response) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(response.request().clone(), response.clone());
        }
    }

    /// Maps a descriptor onto the service's query parameters
    fn build_query(&self, desc: &RequestDescriptor) -> Vec<(String, String)> {
        let options = desc.options();
        let mut query = vec![
            ("key".to_string(), self.api_key.clone()),
            ("url".to_string(), desc.url().to_string()),
        ];

        if let Some(country) = &options.country {
            query.push(("country".to_string(), country.clone()));
        }
        if options.cache {
            query.push(("cache".to_string(), "true".to_string()));
        }
        if options.render_js {
            query.push(("render_js".to_string(), "true".to_string()));
        }
        if let Some(session) = &options.session {
            query.push(("session".to_string(), session.clone()));
        }
        if let Some(selector) = &options.wait_selector {
            query.push(("wait_for_selector".to_string(), selector.clone()));
        }
        if let Some(wait) = options.rendering_wait_ms {
            query.push(("rendering_wait".to_string(), wait.to_string()));
        }
        if let Some(pool) = options.proxy_pool {
            query.push(("proxy_pool".to_string(), pool.as_str().to_string()));
        }
        if let Some(timeout) = options.timeout_ms {
            query.push(("timeout".to_string(), timeout.to_string()));
        }
        for (name, value) in desc.headers() {
            query.push((format!("headers[{}]", name), value.clone()));
        }

        query
    }

    /// Issues one upstream request without caching or deadlines
    async fn send(&self, desc: &RequestDescriptor) -> FetchResult {
        let query = self.build_query(desc);
        let builder = match desc.method() {
            Method::Read => self.client.get(self.endpoint.clone()),
            Method::Write => self
                .client
                .post(self.endpoint.clone())
                .body(desc.body().map(<[u8]>::to_vec).unwrap_or_default()),
        };

        let response = builder
            .query(&query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(classify_service_error(status, &bytes));
        }

        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| FetchFailure::service(format!("Undecodable service envelope: {}", e)))?;

        envelope.result.into_response(desc)
    }
}

#[async_trait]
impl FetchAdapter for ServiceClient {
    async fn fetch(&self, desc: &RequestDescriptor) -> FetchResult {
        let options = desc.options();

        if options.cache {
            if let Some(hit) = self.cache_lookup(desc) {
                tracing::debug!("Cache hit for {}", desc.url());
                return Ok(hit);
            }
        }

        let result = match options.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), self.send(desc)).await
            {
                Ok(result) => result,
                Err(_) => Err(FetchFailure::timeout(format!(
                    "No response for {} within {}ms",
                    desc.url(),
                    ms
                ))),
            },
            None => self.send(desc).await,
        };

        if let (true, Ok(response)) = (options.cache, &result) {
            self.cache_store(response);
        }

        result
    }
}

/// Successful service reply
#[derive(Debug, Deserialize)]
struct Envelope {
    result: EnvelopeResult,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResult {
    status_code: u16,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    format: ContentFormat,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    browser_data: Option<BrowserData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContentFormat {
    #[default]
    Text,
    Binary,
}

#[derive(Debug, Deserialize)]
struct BrowserData {
    #[serde(default)]
    xhr_call: Vec<XhrCapture>,
}

impl EnvelopeResult {
    fn into_response(self, desc: &RequestDescriptor) -> FetchResult {
        if !(200..300).contains(&self.status_code) {
            return Err(FetchFailure::bad_status(format!(
                "Upstream returned HTTP {} for {}",
                self.status_code, self.url
            )));
        }

        let body = match self.format {
            ContentFormat::Text => self.content.into_bytes(),
            ContentFormat::Binary => base64::engine::general_purpose::STANDARD
                .decode(self.content.trim())
                .map_err(|e| FetchFailure::service(format!("Invalid binary content: {}", e)))?,
        };

        let mut response = Response::new(desc.clone(), self.status_code, self.url, body);
        if let Some(content_type) = self.content_type {
            response = response.with_content_type(content_type);
        }
        if let Some(browser) = self.browser_data {
            response = response.with_xhr(browser.xhr_call);
        }

        Ok(response)
    }
}

/// Classifies a reqwest error raised before a service reply was read
fn classify_transport_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::timeout(format!("Request timeout: {}", e))
    } else if e.is_connect() {
        FetchFailure::transport(format!("Connection failed: {}", e))
    } else {
        FetchFailure::transport(e.to_string())
    }
}

/// Classifies a non-2xx reply from the service itself
fn classify_service_error(status: StatusCode, body: &[u8]) -> FetchFailure {
    let (code, message) = error_details(body);
    let cause = match &message {
        Some(message) => format!("Service returned HTTP {} ({}): {}", status.as_u16(), code, message),
        None => format!("Service returned HTTP {} ({})", status.as_u16(), code),
    };
    let code = code.to_ascii_uppercase();

    let kind = if code.contains("QUOTA") {
        FailureKind::Quota
    } else if code.contains("BLOCKED") || code.contains("ASP") {
        FailureKind::Blocked
    } else if code.contains("TIMEOUT") {
        FailureKind::Timeout
    } else {
        match status.as_u16() {
            402 | 429 => FailureKind::Quota,
            403 => FailureKind::Blocked,
            408 | 504 => FailureKind::Timeout,
            401 => return FetchFailure::service(cause).with_retryable(false),
            _ => FailureKind::Service,
        }
    };

    FetchFailure::new(kind, cause)
}

/// Pulls `code` and `message` from an error body, at the root or under `error`
fn error_details(body: &[u8]) -> (String, Option<String>) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return ("unknown".to_string(), None);
    };
    let details = value.get("error").filter(|e| e.is_object()).unwrap_or(&value);

    let code = details
        .get("code")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();
    let message = details
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string);

    (code, message)
}
