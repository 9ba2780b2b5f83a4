//! HTTP transport
//!
//! A minimal request/response contract so probes can be tested against canned
//! responses. `ReqwestNetworkClient` is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::services::quota::ProbeError;
use crate::utils::truncate_for_log;

/// Default timeout for one HTTP round-trip
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One HTTP request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Set a JSON body and the matching content type
    pub fn json_body(mut self, body: &serde_json::Value) -> Self {
        self.body = Some(body.to_string());
        self.header("Content-Type", "application/json")
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value of the first header with this name (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status code and body of a completed round-trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    /// Map non-2xx statuses onto the probe error taxonomy
    pub fn error_for_status(self) -> Result<Self, ProbeError> {
        match self.status {
            s if (200..300).contains(&s) => Ok(self),
            401 | 403 => Err(ProbeError::AuthenticationRequired),
            429 => Err(ProbeError::RateLimited),
            s => Err(ProbeError::ExecutionFailed(format!(
                "HTTP {}: {}",
                s,
                truncate_for_log(self.body.trim(), 200)
            ))),
        }
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProbeError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Performs HTTP round-trips on behalf of probes
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Transport failures are errors; any HTTP status is a response
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ProbeError>;
}

// ============================================================================
// reqwest implementation
// ============================================================================

/// `NetworkClient` backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestNetworkClient {
    client: reqwest::Client,
}

impl Default for ReqwestNetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestNetworkClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Client for localhost servers with self-signed certificates
    pub fn accepting_self_signed() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ProbeError::ExecutionFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkClient for ReqwestNetworkClient {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ProbeError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.timeout(request.timeout).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        log::debug!(
            "[quota:http] {:?} {} -> {}",
            request.method,
            request.url,
            status
        );

        Ok(HttpResponse { status, body })
    }
}
