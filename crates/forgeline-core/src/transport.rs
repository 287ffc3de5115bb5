//! HTTP transport port used by forge adapters and extension clients.
//!
//! Adapters build [`ApiRequest`]s and hand them to an [`ApiTransport`];
//! [`ReqwestTransport`] is the production implementation and
//! [`crate::fakes::MockTransport`] replays canned responses in tests.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::domain::{ForgeError, ForgeResult};

/// Default per-call timeout for forge and extension requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("forgeline/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    pub fn with_basic(self, username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        self.with_header("Authorization", format!("Basic {encoded}"))
    }

    /// Serialize `body` as JSON and set the content type.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> ForgeResult<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ForgeError::MalformedPayload(format!("encode request body: {e}")))?;
        self.body = Some(bytes);
        Ok(self.with_header("Content-Type", "application/json"))
    }

    pub fn with_form(mut self, pairs: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.body = Some(encoded.into_bytes());
        self.with_header("Content-Type", "application/x-www-form-urlencoded")
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response as seen by adapters. Header names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn json_body<T: Serialize>(status: u16, value: &T) -> Self {
        Self::new(status, serde_json::to_vec(value).unwrap_or_default())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx status into the matching [`ForgeError`].
    pub fn error_for_status(self) -> ForgeResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(classify_status(self.status, &self.text()))
        }
    }

    /// Check the status, then decode the body.
    pub fn json<T: DeserializeOwned>(self) -> ForgeResult<T> {
        let resp = self.error_for_status()?;
        serde_json::from_slice(&resp.body)
            .map_err(|e| ForgeError::MalformedPayload(format!("decode response: {e}")))
    }

    /// URL of the next page from a `Link: <..>; rel="next"` header.
    pub fn next_link(&self) -> Option<String> {
        self.header("link").and_then(parse_next_link)
    }
}

/// Map an HTTP error status to the error taxonomy.
pub fn classify_status(status: u16, body: &str) -> ForgeError {
    let message = truncate(body, 512);
    match status {
        404 => ForgeError::NotFound(message),
        401 | 403 => ForgeError::Unauthorized(message),
        408 | 429 | 500..=599 => ForgeError::Transient(format!("HTTP {status}: {message}")),
        _ => ForgeError::Api { status, message },
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Parse an RFC 8288 `Link` header and return the `rel="next"` target.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if is_next {
            Some(
                target
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            )
        } else {
            None
        }
    })
}

/// Sends [`ApiRequest`]s.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, req: ApiRequest) -> ForgeResult<ApiResponse>;
}

// ---------------------------------------------------------------------------
// ReqwestTransport
// ---------------------------------------------------------------------------

/// [`ApiTransport`] over a shared `reqwest::Client`.
///
/// Every call carries a timeout; a timed-out call fails with
/// `ForgeError::DeadlineExceeded`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a new transport with the default timeout.
    pub fn new() -> ForgeResult<Self> {
        Self::build(false, DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a transport; `skip_verify` disables TLS certificate checks.
    pub fn build(skip_verify: bool, timeout: Duration) -> ForgeResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(skip_verify)
            .build()
            .map_err(|e| ForgeError::Transport(format!("build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ForgeError {
    if err.is_timeout() {
        ForgeError::DeadlineExceeded(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ForgeError::Transient(err.to_string())
    } else {
        ForgeError::Transport(err.to_string())
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn send(&self, req: ApiRequest) -> ForgeResult<ApiResponse> {
        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &req.url)
            .timeout(req.timeout.unwrap_or(self.timeout));
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        debug!(method = req.method.as_str(), url = %req.url, "sending request");
        let resp = builder.send().await.map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
