use crate::fetch::{FetchOptions, RetryPolicy, DEFAULT_CONCURRENCY};
use crate::pagination::DEFAULT_PAGE_CEILING;
use crate::scrape::ScrapeSettings;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Paged-Sweep
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    /// Default fetch options applied to the seed request
    #[serde(default)]
    pub fetch: FetchOptions,
}

/// Scraping service connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service endpoint that accepts scrape requests
    pub endpoint: String,

    /// Name of the environment variable holding the service credential
    #[serde(rename = "key-env", default = "default_key_env")]
    pub key_env: String,

    /// TCP connect timeout towards the service (milliseconds)
    #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// User agent sent to the service
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Coordinator behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrapeConfig {
    /// Maximum number of concurrent page fetches
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Hard upper bound on pages per scrape, seed included
    #[serde(rename = "page-ceiling", default = "default_page_ceiling")]
    pub page_ceiling: usize,

    /// Deadline for a whole scrape call (milliseconds)
    #[serde(rename = "deadline-ms", default)]
    pub deadline_ms: Option<u64>,

    /// Opt-in retry policy; no retries when absent
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            page_ceiling: default_page_ceiling(),
            deadline_ms: None,
            retry: None,
        }
    }
}

impl ScrapeConfig {
    /// Converts the file settings into coordinator settings
    pub fn to_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            concurrency: self.concurrency,
            page_ceiling: self.page_ceiling,
            retry: self.retry.clone(),
            deadline: self.deadline_ms.map(Duration::from_millis),
            ..ScrapeSettings::default()
        }
    }
}

fn default_key_env() -> String {
    String::from("PAGED_SWEEP_API_KEY")
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    format!("paged-sweep/{}", env!("CARGO_PKG_VERSION"))
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_page_ceiling() -> usize {
    DEFAULT_PAGE_CEILING
}
