//! Opt-in retry policy applied per descriptor
//!
//! | Failure | Retried |
//! |---------|---------|
//! | transport, timeout, service | when `retryable` is set |
//! | blocked | only with `retry-blocked = true` |
//! | quota | only with `retry-quota = true` |
//! | bad_status | never, unless the adapter marked it retryable |

use crate::fetch::{FailureKind, FetchAdapter, FetchFailure, FetchResult, RequestDescriptor};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts per descriptor, including the first one
    pub attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub retry_blocked: bool,

    #[serde(default)]
    pub retry_quota: bool,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl RetryPolicy {
    /// A policy making `attempts` total attempts with default backoff
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay_ms: default_base_delay_ms(),
            backoff_base: default_backoff_base(),
            max_delay_ms: default_max_delay_ms(),
            retry_blocked: false,
            retry_quota: false,
        }
    }

    /// Whether `failure` may be retried under this policy
    pub fn should_retry(&self, failure: &FetchFailure) -> bool {
        match failure.kind {
            FailureKind::Blocked => self.retry_blocked,
            FailureKind::Quota => self.retry_quota,
            FailureKind::ParseEmpty | FailureKind::Cancelled => false,
            _ => failure.retryable,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let millis = self.base_delay_ms as f64 * self.backoff_base.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }

    /// Backoff scaled by a random factor in `[0.5, 1.5)`
    pub fn jittered_backoff(&self, retry: u32) -> Duration {
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        self.backoff(retry).mul_f64(factor)
    }
}

/// Adapter decorator applying a [`RetryPolicy`] to every fetch
///
/// With no policy it is a plain pass-through. A retry is skipped when its
/// backoff would end past `deadline`; the last failure is returned instead.
pub struct Retrying<'a, A: ?Sized> {
    inner: &'a A,
    policy: Option<&'a RetryPolicy>,
    deadline: Option<Instant>,
}

impl<'a, A: ?Sized> Retrying<'a, A> {
    pub fn new(inner: &'a A, policy: Option<&'a RetryPolicy>, deadline: Option<Instant>) -> Self {
        Self {
            inner,
            policy,
            deadline,
        }
    }
}

#[async_trait]
impl<'a, A> FetchAdapter for Retrying<'a, A>
where
    A: FetchAdapter + ?Sized,
{
    async fn fetch(&self, desc: &RequestDescriptor) -> FetchResult {
        let mut attempt = 1;

        loop {
            let failure = match self.inner.fetch(desc).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            let Some(policy) = self.policy else {
                return Err(failure);
            };

            if attempt >= policy.attempts || !policy.should_retry(&failure) {
                return Err(failure);
            }

            let delay = policy.jittered_backoff(attempt);
            if let Some(deadline) = self.deadline {
                if Instant::now() + delay >= deadline {
                    tracing::debug!(
                        "Not retrying {}: backoff of {:?} would pass the scrape deadline",
                        desc.url(),
                        delay
                    );
                    return Err(failure);
                }
            }

            tracing::debug!(
                "Retrying {} after {} (attempt {}/{}, waiting {:?})",
                desc.url(),
                failure,
                attempt + 1,
                policy.attempts,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
