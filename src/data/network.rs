//! Network access for the interception policy
//!
//! Defines the `Network` trait the policy issues requests through, the
//! reqwest-backed `HttpNetwork` used by the binary, and `OfflineNetwork` for
//! simulating a disconnected client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use thiserror::Error;

use super::{Request, Response};

/// Errors that can occur when issuing a request to the network
///
/// An HTTP error status is not a `NetworkError`; it is returned as a
/// `Response` whose `ok()` flag is false.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The network could not be reached (connect, DNS, timeout)
    #[error("Network unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    /// The request could not be turned into an HTTP request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The client is offline
    #[error("Network is offline")]
    Offline,
}

/// Something that can carry a request to its destination and bring back a response
#[async_trait]
pub trait Network: Send + Sync {
    /// Issues the request, failing only when no response could be obtained
    async fn issue(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Client for issuing requests over HTTP
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl Default for HttpNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpNetwork {
    /// Create a new HttpNetwork with default settings
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a new HttpNetwork with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Create a new HttpNetwork whose requests fail after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Converts our header list into a reqwest header map
    fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, NetworkError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| NetworkError::InvalidRequest(format!("header name '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| NetworkError::InvalidRequest(format!("header value for '{}': {}", name, e)))?;
            map.append(header_name, header_value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn issue(&self, request: &Request) -> Result<Response, NetworkError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| NetworkError::InvalidRequest(format!("method '{}': {}", request.method, e)))?;
        let headers = Self::header_map(&request.headers)?;

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        // A body cut off after the headers is a transport failure, never a partial response
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// A network that is never reachable
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
    async fn issue(&self, _request: &Request) -> Result<Response, NetworkError> {
        Err(NetworkError::Offline)
    }
}
