//! Failure kinds for page fetches and page outcomes
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// What went wrong with a single page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// DNS or connection failure
    Transport,

    /// Anti-bot signal reported by the service
    Blocked,

    /// Service credential exhausted
    Quota,

    /// Per-request or per-scrape deadline exceeded
    Timeout,

    /// The final upstream response was not 2xx
    BadStatus,

    /// The scraping service itself failed
    Service,

    /// The extractor found no records in a well-formed response
    ParseEmpty,

    /// The scrape was cancelled before the page settled
    Cancelled,
}

impl FailureKind {
    /// Whether a failure of this kind is retryable unless stated otherwise
    ///
    /// Blocked and quota failures usually mean a systemic problem, so they
    /// are only retried when a retry policy opts in explicitly.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, Self::Transport | Self::Timeout | Self::Service)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Blocked => "blocked",
            Self::Quota => "quota",
            Self::Timeout => "timeout",
            Self::BadStatus => "bad_status",
            Self::Service => "service",
            Self::ParseEmpty => "parse_empty",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed fetch failure returned by a fetch adapter
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} failure: {cause}")]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub retryable: bool,
    pub cause: String,
}

impl FetchFailure {
    /// Creates a failure with the kind's default retryability
    pub fn new(kind: FailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable_by_default(),
            cause: cause.into(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn transport(cause: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, cause)
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, cause)
    }

    pub fn blocked(cause: impl Into<String>) -> Self {
        Self::new(FailureKind::Blocked, cause)
    }

    pub fn quota(cause: impl Into<String>) -> Self {
        Self::new(FailureKind::Quota, cause)
    }

    pub fn bad_status(cause: impl Into<String>) -> Self {
        Self::new(FailureKind::BadStatus, cause)
    }

    pub fn service(cause: impl Into<String>) -> Self {
        Self::new(FailureKind::Service, cause)
    }
}
