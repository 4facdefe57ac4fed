use crate::config::types::{Config, ScrapeConfig, ServiceConfig};
use crate::fetch::RetryPolicy;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_service_config(&config.service)?;
    validate_scrape_config(&config.scrape)?;
    config.fetch.validate()?;
    Ok(())
}

/// Validates service connection settings
fn validate_service_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    let endpoint = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "endpoint must use http or https, got '{}'",
            endpoint.scheme()
        )));
    }

    if config.key_env.is_empty() {
        return Err(ConfigError::Validation(
            "key_env cannot be empty".to_string(),
        ));
    }

    if !config
        .key_env
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "key_env must contain only uppercase letters, digits and underscores, got '{}'",
            config.key_env
        )));
    }

    if config.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "connect_timeout_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates coordinator settings
fn validate_scrape_config(config: &ScrapeConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.page_ceiling < 1 {
        return Err(ConfigError::Validation(format!(
            "page_ceiling must be >= 1, got {}",
            config.page_ceiling
        )));
    }

    if config.deadline_ms == Some(0) {
        return Err(ConfigError::Validation(
            "deadline_ms must be > 0 when set".to_string(),
        ));
    }

    if let Some(retry) = &config.retry {
        validate_retry_policy(retry)?;
    }

    Ok(())
}

/// Validates the retry policy
fn validate_retry_policy(policy: &RetryPolicy) -> Result<(), ConfigError> {
    if policy.attempts < 1 || policy.attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "retry attempts must be between 1 and 10, got {}",
            policy.attempts
        )));
    }

    if policy.backoff_base.is_nan() || policy.backoff_base < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry backoff_base must be >= 1.0, got {}",
            policy.backoff_base
        )));
    }

    if policy.base_delay_ms > policy.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            policy.base_delay_ms, policy.max_delay_ms
        )));
    }

    Ok(())
}
