use crate::fetch::RequestDescriptor;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// An XHR call captured by the service during a browser-rendered fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XhrCapture {
    pub url: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub body: Option<String>,
}

/// A fetched page as returned by the fetch adapter
///
/// Responses are immutable. They are `Clone` so an adapter may hand the
/// same response out again for a cacheable request.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    final_url: String,
    body: Vec<u8>,
    content_type: Option<String>,
    xhr: Option<Vec<XhrCapture>>,
    request: RequestDescriptor,
}

impl Response {
    /// Creates a response for `request`
    ///
    /// `final_url` is the URL after redirects as reported by the service.
    pub fn new(
        request: RequestDescriptor,
        status: u16,
        final_url: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            final_url: final_url.into(),
            body: body.into(),
            content_type: None,
            xhr: None,
            request,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Attaches captured XHR calls; ignored unless the request asked for
    /// a browser-rendered fetch
    pub fn with_xhr(mut self, calls: Vec<XhrCapture>) -> Self {
        if self.request.options().render_js {
            self.xhr = Some(calls);
        }
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn final_url(&self) -> &str {
        &self.final_url
    }

    /// Raw body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn xhr(&self) -> Option<&[XhrCapture]> {
        self.xhr.as_deref()
    }

    /// The descriptor this response answers
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Parses the body as an HTML document
    ///
    /// Returns `None` when the content type says the body is something
    /// other than HTML.
    pub fn document(&self) -> Option<Html> {
        match self.content_type() {
            Some(ct) if !ct.contains("html") => None,
            _ => Some(Html::parse_document(&self.text())),
        }
    }

    /// Parses the body as JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Whether the body is gzip-compressed (by content type or magic bytes)
    pub fn is_gzip(&self) -> bool {
        let declared = self
            .content_type()
            .map(|ct| ct.contains("gzip"))
            .unwrap_or(false);
        declared || self.body.starts_with(&[0x1f, 0x8b])
    }
}
