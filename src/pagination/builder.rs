use crate::ConfigError;
use std::str::FromStr;
use url::Url;

/// Page-URL construction policy for a site type
///
/// Pages are 1-based; the seed is page 1.
#[derive(Debug, Clone)]
pub enum PageUrlBuilder {
    /// Insert or replace an integer page-number parameter
    QueryParam { param: String },

    /// Insert or replace `(page - 1) * page_size`; needs a known page size
    Offset { param: String },

    /// Follow the preceding page's cursor; pages cannot be precomputed
    Cursor { param: String },

    /// Site-specific construction from (seed, page, page size)
    Custom(fn(&Url, usize, Option<usize>) -> Option<Url>),
}

impl PageUrlBuilder {
    /// The common `?page=N` policy
    pub fn page() -> Self {
        Self::query("page")
    }

    pub fn query(param: impl Into<String>) -> Self {
        Self::QueryParam {
            param: param.into(),
        }
    }

    pub fn offset(param: impl Into<String>) -> Self {
        Self::Offset {
            param: param.into(),
        }
    }

    pub fn cursor(param: impl Into<String>) -> Self {
        Self::Cursor {
            param: param.into(),
        }
    }

    pub fn is_cursor(&self) -> bool {
        matches!(self, Self::Cursor { .. })
    }

    /// URL of `page` derived from `seed`
    ///
    /// Returns `None` when the page cannot be addressed: cursor policies,
    /// offset policies without a positive page size, and offsets that do
    /// not fit in `usize`.
    pub fn page_url(&self, seed: &Url, page: usize, page_size: Option<usize>) -> Option<Url> {
        match self {
            Self::QueryParam { param } => Some(with_query_param(seed, param, &page.to_string())),
            Self::Offset { param } => {
                let size = page_size.filter(|size| *size > 0)?;
                let offset = page.checked_sub(1)?.checked_mul(size)?;
                Some(with_query_param(seed, param, &offset.to_string()))
            }
            Self::Cursor { .. } => None,
            Self::Custom(build) => build(seed, page, page_size),
        }
    }

    /// URL addressing the page behind `cursor`; `None` for non-cursor policies
    pub fn cursor_url(&self, seed: &Url, cursor: &str) -> Option<Url> {
        match self {
            Self::Cursor { param } => Some(with_query_param(seed, param, cursor)),
            _ => None,
        }
    }
}

impl FromStr for PageUrlBuilder {
    type Err = ConfigError;

    /// Parses `page`, `query:NAME`, `offset:NAME` or `cursor:NAME`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "page" {
            return Ok(Self::page());
        }

        let invalid = || {
            ConfigError::Validation(format!(
                "paging must be 'page', 'query:NAME', 'offset:NAME' or 'cursor:NAME', got '{}'",
                s
            ))
        };

        let (kind, param) = s.split_once(':').ok_or_else(invalid)?;
        let param = param.trim();
        if param.is_empty() {
            return Err(invalid());
        }

        match kind.trim() {
            "query" => Ok(Self::query(param)),
            "offset" => Ok(Self::offset(param)),
            "cursor" => Ok(Self::cursor(param)),
            _ => Err(invalid()),
        }
    }
}

/// Sets `key=value` in the query of `url`
///
/// The first occurrence of `key` is replaced in place and later duplicates
/// are dropped; every other parameter keeps its position. A missing key is
/// appended. The whole query is re-serialized as
/// `application/x-www-form-urlencoded`, so other parameters come back in
/// that encoding (`%20` becomes `+`, a bare `flag` becomes `flag=`).
pub fn with_query_param(url: &Url, key: &str, value: &str) -> Url {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut replaced = false;

    for (k, v) in url.query_pairs() {
        if k == key {
            if !replaced {
                pairs.push((k.into_owned(), value.to_string()));
                replaced = true;
            }
        } else {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }

    if !replaced {
        pairs.push((key.to_string(), value.to_string()));
    }

    let mut result = url.clone();
    result.query_pairs_mut().clear().extend_pairs(pairs);
    result
}
