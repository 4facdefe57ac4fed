//! Request descriptors and the fetch option bag
//!
//! A `RequestDescriptor` is built once and never mutated. Builder methods
//! consume `self`, and follow-up page descriptors are derived with
//! [`RequestDescriptor::for_url`], which copies everything except the URL.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Option keys the fetch service understands
pub const RECOGNIZED_OPTIONS: &[&str] = &[
    "country",
    "cache",
    "render_js",
    "session",
    "wait_selector",
    "rendering_wait_ms",
    "proxy_pool",
    "timeout_ms",
];

/// Request method as seen by the fetch service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Read,
    Write,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named proxy pool of the fetch service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyPool {
    Datacenter,
    Residential,
    Mobile,
}

impl ProxyPool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Datacenter => "datacenter",
            Self::Residential => "residential",
            Self::Mobile => "mobile",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "datacenter" => Some(Self::Datacenter),
            "residential" => Some(Self::Residential),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }
}

/// The configuration bag attached to every request
///
/// Only the keys in [`RECOGNIZED_OPTIONS`] exist. Deserializing from TOML
/// rejects unknown keys, and so does [`FetchOptions::from_pairs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FetchOptions {
    /// Two-letter region hint (ISO-3166-1 alpha-2), stored lowercase
    pub country: Option<String>,

    /// Permit reuse of a prior response for an identical request
    pub cache: bool,

    /// Ask the service for a browser-rendered fetch
    pub render_js: bool,

    /// Stickiness key for cookie continuity across a scrape
    pub session: Option<String>,

    /// CSS selector the service must observe before returning
    pub wait_selector: Option<String>,

    /// Extra time the browser waits after load (milliseconds)
    pub rendering_wait_ms: Option<u64>,

    pub proxy_pool: Option<ProxyPool>,

    /// Per-request deadline (milliseconds)
    pub timeout_ms: Option<u64>,
}

impl FetchOptions {
    /// Builds options from `key=value` pairs, rejecting unknown keys
    ///
    /// Keys may be written in snake_case or kebab-case.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_sweep::fetch::FetchOptions;
    ///
    /// let options = FetchOptions::from_pairs([("country", "DE"), ("render-js", "true")]).unwrap();
    /// assert_eq!(options.country.as_deref(), Some("de"));
    /// assert!(options.render_js);
    ///
    /// assert!(FetchOptions::from_pairs([("colour", "blue")]).is_err());
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::default().with_overrides(pairs)
    }

    /// Returns a copy of these options with the given pairs applied on top
    pub fn with_overrides<I, K, V>(mut self, pairs: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            self.apply(key.as_ref(), value.as_ref())?;
        }
        self.validate()?;
        Ok(self)
    }

    fn apply(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let normalized = key.trim().replace('-', "_");
        if !RECOGNIZED_OPTIONS.contains(&normalized.as_str()) {
            return Err(ConfigError::UnknownOption(key.to_string()));
        }

        let invalid = || ConfigError::InvalidOption {
            key: normalized.clone(),
            value: value.to_string(),
        };

        match normalized.as_str() {
            "country" => self.country = Some(value.trim().to_ascii_lowercase()),
            "cache" => self.cache = parse_bool(value).ok_or_else(invalid)?,
            "render_js" => self.render_js = parse_bool(value).ok_or_else(invalid)?,
            "session" => self.session = Some(value.to_string()),
            "wait_selector" => self.wait_selector = Some(value.to_string()),
            "rendering_wait_ms" => {
                self.rendering_wait_ms = Some(value.trim().parse().map_err(|_| invalid())?)
            }
            "proxy_pool" => self.proxy_pool = Some(ProxyPool::parse(value).ok_or_else(invalid)?),
            "timeout_ms" => self.timeout_ms = Some(value.trim().parse().map_err(|_| invalid())?),
            _ => return Err(ConfigError::UnknownOption(key.to_string())),
        }

        Ok(())
    }

    /// Checks the option values for internal consistency
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::Validation(format!(
                    "country must be a two-letter region code, got '{}'",
                    country
                )));
            }
        }

        if let Some(session) = &self.session {
            if session.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "session cannot be empty".to_string(),
                ));
            }
        }

        if let Some(selector) = &self.wait_selector {
            if scraper::Selector::parse(selector).is_err() {
                return Err(ConfigError::Validation(format!(
                    "wait_selector is not a valid CSS selector: '{}'",
                    selector
                )));
            }
        }

        if !self.render_js && (self.wait_selector.is_some() || self.rendering_wait_ms.is_some()) {
            return Err(ConfigError::Validation(
                "wait_selector and rendering_wait_ms require render_js".to_string(),
            ));
        }

        if self.timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A single request to issue through the fetch adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    url: Url,
    method: Method,
    body: Option<Vec<u8>>,
    headers: BTreeMap<String, String>,
    options: FetchOptions,
}

impl RequestDescriptor {
    /// Creates a read request with default options
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::Read,
            body: None,
            headers: BTreeMap::new(),
            options: FetchOptions::default(),
        }
    }

    /// Parses `url` and creates a read request with default options
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Derives a descriptor for another URL with the same method, body,
    /// headers and options
    pub fn for_url(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }
}
