//! Core data models for the PCD offline cache
//!
//! This module contains the request and response records that flow between
//! the application, the network and the cache store, plus the normalized
//! request key used to address cache entries.

pub mod network;

pub use network::{HttpNetwork, Network, NetworkError, OfflineNetwork};

use serde::{Deserialize, Serialize};
use url::Url;

/// An outgoing network call initiated by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method, always stored uppercase
    pub method: String,
    /// Absolute URL of the request
    pub url: Url,
    /// Request headers in the order they were added
    pub headers: Vec<(String, String)>,
    /// Request body (empty for GET)
    pub body: Vec<u8>,
}

impl Request {
    /// Creates a GET request for the given URL
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Creates a request with an arbitrary method and no headers or body
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header to the request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the URL path component (e.g. `/api/deals`)
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Returns the cache key for this request, or `None` if the request
    /// cannot be stored in a cache (only GET requests are cacheable)
    pub fn cache_key(&self) -> Option<RequestKey> {
        RequestKey::for_request(self)
    }
}

/// A complete response record: status, headers and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers in the order they were received
    pub headers: Vec<(String, String)>,
    /// Raw response body
    pub body: Vec<u8>,
}

impl Response {
    /// Creates a response with the given status and body and no headers
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header to the response
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether the status is in the successful (2xx) range
    pub fn ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Looks up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Normalized identity of a request inside a cache store
///
/// The key is the method plus the URL without its fragment. Scheme and host
/// case, default ports and percent-encoding are normalized by the `url`
/// crate when the URL is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    /// Uppercase HTTP method
    pub method: String,
    /// Normalized URL without fragment
    pub url: String,
}

impl RequestKey {
    /// Builds the key for a request, returning `None` for non-GET requests
    pub fn for_request(request: &Request) -> Option<Self> {
        if request.method != "GET" {
            return None;
        }
        let mut url = request.url.clone();
        url.set_fragment(None);
        Some(Self {
            method: request.method.clone(),
            url: url.to_string(),
        })
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
