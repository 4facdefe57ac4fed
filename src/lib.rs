//! Paged-Sweep: paginated concurrent scraping through a managed fetch service
//!
//! This crate fetches a seed page through an external scraping service,
//! extracts records and pagination metadata from it, plans the remaining
//! pages, and fetches them concurrently while keeping records in page order.

pub mod config;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod pagination;
pub mod scrape;

use thiserror::Error;

/// Main error type for Paged-Sweep operations
///
/// Page-level fetch problems never surface here; they are recorded in the
/// scrape outcome. These are the conditions that stop a run before it starts.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing scraping service credential: environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Unknown target type: {0}")]
    UnknownTargetType(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scrape task failed: {0}")]
    Task(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown fetch option: {0}")]
    UnknownOption(String),

    #[error("Invalid value for fetch option {key}: {value}")]
    InvalidOption { key: String, value: String },
}

/// Result type alias for Paged-Sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use extract::{ExtractionResult, ExtractorRegistry, PageMeta, Record};
pub use fetch::{FailureKind, FetchAdapter, FetchFailure, FetchOptions, RequestDescriptor, Response};
pub use pagination::{PageCaps, PageUrlBuilder};
pub use scrape::{
    scrape, scrape_stream, Coordinator, ScrapeOutcome, ScrapeRequest, ScrapeSettings, ScrapeStream,
};
