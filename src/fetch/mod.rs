//! Fetch module: the boundary to the external scraping service
//!
//! This module contains:
//! - Request descriptors and the enumerated fetch option bag
//! - Responses and typed fetch failures
//! - The `FetchAdapter` trait with bounded-concurrency `fetch_many`
//! - The HTTP-backed `ServiceClient`
//! - The opt-in retry decorator used by the coordinator

mod adapter;
mod failure;
mod request;
mod response;
mod retry;
mod service;

pub use adapter::{FetchAdapter, FetchResult, DEFAULT_CONCURRENCY};
pub use failure::{FailureKind, FetchFailure};
pub use request::{FetchOptions, Method, ProxyPool, RequestDescriptor, RECOGNIZED_OPTIONS};
pub use response::{Response, XhrCapture};
pub use retry::{RetryPolicy, Retrying};
pub use service::{build_http_client, ServiceClient, DEFAULT_CACHE_CAPACITY};
