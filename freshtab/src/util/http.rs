//! Minimal asynchronous HTTP GET abstraction.
//!
//! The photo cache only ever issues GET requests and needs the status, the content type and the
//! body of the response. [HttpClient] captures exactly that so the network can be replaced by a
//! scripted fake in tests (see [crate::test_util::http]).

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use url::Url;

/// A GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// A fully received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure to obtain any response, e.g. DNS resolution, refused connection or timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "network error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request and reads the complete response.
    ///
    /// Any received response is returned as `Ok`, regardless of its status code.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [HttpClient] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Creates a client identifying itself as freshtab, with the given per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        reqwest::Client::builder()
            .user_agent(concat!("freshtab/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map(Self::new)
            .map_err(|err| TransportError::new(err.to_string()))
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::new(err.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::new(err.to_string()))?;
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
