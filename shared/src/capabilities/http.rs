use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;
/// Chat histories are the largest replies the backend sends.
pub const MAX_RESPONSE_BODY_SIZE: usize = 8 * 1024 * 1024;
pub const MAX_TIMEOUT_MS: u64 = 120_000;
const MAX_HEADER_VALUE_LENGTH: usize = 4096;

/// An absolute http(s) URL with a host and no embedded credentials.
///
/// Loopback and private hosts are accepted: development backends usually
/// listen on `localhost`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    host: String,
    path: String,
}

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let raw = url.into();
        let raw = raw.trim();
        let reject = |reason: &str| HttpError::InvalidUrl {
            url: raw.chars().take(100).collect(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(reject("empty URL"));
        }
        if raw.len() > MAX_URL_LENGTH {
            return Err(reject("URL is too long"));
        }
        let parsed = Url::parse(raw).map_err(|e| reject(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(reject("only http and https are supported"));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(reject("credentials belong in headers, not the URL"));
        }
        let host = parsed
            .host_str()
            .map(str::to_lowercase)
            .ok_or_else(|| reject("missing host"))?;

        Ok(Self {
            path: parsed.path().to_string(),
            url: parsed.into(),
            host,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path component, e.g. `/api/emergency-requests/my`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Case-insensitive header list. Setting a name again replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeaders(Vec<(String, String)>);

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), HttpError> {
        let value = value.into();
        let bad_name = name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if bad_name {
            return Err(HttpError::InvalidHeader {
                name: name.chars().take(50).collect(),
                reason: "header names are ASCII letters, digits, '-' or '_'".to_string(),
            });
        }
        if value.len() > MAX_HEADER_VALUE_LENGTH || value.contains(['\r', '\n', '\0']) {
            return Err(HttpError::InvalidHeader {
                name: name.to_string(),
                reason: "header value is too long or contains control characters".to_string(),
            });
        }

        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.0.push((name.to_string(), value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl From<Vec<(String, String)>> for HttpHeaders {
    fn from(headers: Vec<(String, String)>) -> Self {
        Self(headers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub const fn has_request_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend call. Every request carries a generated id that shows up in
/// logs and in timeout errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    method: HttpMethod,
    url: ValidatedUrl,
    headers: HttpHeaders,
    body: Option<Vec<u8>>,
    timeout_ms: u64,
    request_id: String,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Result<Self, HttpError> {
        Ok(Self {
            method,
            url: ValidatedUrl::new(url)?,
            headers: HttpHeaders::new(),
            body: None,
            timeout_ms: crate::DEFAULT_REQUEST_TIMEOUT_SECS * 1000,
            request_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Result<Self, HttpError> {
        self.headers.set(name, value)?;
        Ok(self)
    }

    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        if !self.method.has_request_body() {
            return Err(HttpError::InvalidRequest {
                reason: format!("{} carries no body", self.method),
            });
        }
        let body = serde_json::to_vec(value).map_err(|e| HttpError::InvalidRequest {
            reason: format!("body is not serializable: {e}"),
        })?;
        self.headers.set("Content-Type", "application/json")?;
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, HttpError> {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if !(1..=MAX_TIMEOUT_MS).contains(&ms) {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout must be within 1..={MAX_TIMEOUT_MS}ms"),
            });
        }
        self.timeout_ms = ms;
        Ok(self)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &ValidatedUrl {
        &self.url
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The body decoded as JSON, mainly for assertions on recorded requests.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("cannot reach {host}: {message}")]
    ConnectionError { host: String, message: String },

    #[error("request {request_id} timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, request_id: String },

    #[error("reply of {size} bytes exceeds the {max} byte limit")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("unreadable reply to {request_id}: {reason}")]
    InvalidResponse { reason: String, request_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: HttpHeaders,
    body: Vec<u8>,
    request_id: String,
    duration_ms: u64,
}

impl HttpResponse {
    pub fn new(
        status: u16,
        headers: HttpHeaders,
        body: Vec<u8>,
        request_id: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            request_id,
            duration_ms,
        }
    }

    /// A canned JSON reply, as produced by test shells.
    pub fn json_reply(status: u16, value: &serde_json::Value) -> Self {
        let headers = HttpHeaders::from(vec![(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )]);
        Self::new(status, headers, value.to_string().into_bytes(), String::new(), 0)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::InvalidResponse {
            reason: format!("failed to parse JSON: {e}"),
            request_id: self.request_id.clone(),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

pub type HttpResult = Result<HttpResponse, HttpError>;

/// Executes HTTP requests on behalf of the core.
///
/// A non-2xx status is a successful execution: the shell only fails when no
/// response was obtained at all.
#[async_trait(?Send)]
pub trait HttpShell {
    async fn execute(&self, request: HttpRequest) -> HttpResult;
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::ReqwestShell;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::{
        HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpShell,
        MAX_RESPONSE_BODY_SIZE,
    };
    use async_trait::async_trait;
    use std::time::{Duration, Instant};
    use tracing::debug;

    pub struct ReqwestShell {
        client: reqwest::Client,
    }

    impl ReqwestShell {
        pub fn new() -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .user_agent(concat!("vetemergency/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| HttpError::InvalidRequest {
                    reason: format!("failed to build HTTP client: {e}"),
                })?;
            Ok(Self { client })
        }

        fn method(method: HttpMethod) -> reqwest::Method {
            match method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            }
        }

        fn classify(error: &reqwest::Error, request: &HttpRequest) -> HttpError {
            if error.is_timeout() {
                HttpError::Timeout {
                    timeout_ms: request.timeout_ms(),
                    request_id: request.request_id().to_string(),
                }
            } else {
                HttpError::ConnectionError {
                    host: request.url().host().to_string(),
                    message: error.to_string(),
                }
            }
        }
    }

    #[async_trait(?Send)]
    impl HttpShell for ReqwestShell {
        async fn execute(&self, request: HttpRequest) -> HttpResult {
            let started = Instant::now();

            let mut builder = self
                .client
                .request(Self::method(request.method()), request.url().as_str())
                .timeout(Duration::from_millis(request.timeout_ms()));
            for (name, value) in request.headers().iter() {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body() {
                builder = builder.body(body.to_vec());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| Self::classify(&e, &request))?;

            let status = response.status().as_u16();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();

            let body = response
                .bytes()
                .await
                .map_err(|e| Self::classify(&e, &request))?;
            if body.len() > MAX_RESPONSE_BODY_SIZE {
                return Err(HttpError::ResponseTooLarge {
                    size: body.len(),
                    max: MAX_RESPONSE_BODY_SIZE,
                });
            }

            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            debug!(
                method = %request.method(),
                path = request.url().path(),
                status,
                duration_ms,
                "http request completed"
            );

            Ok(HttpResponse::new(
                status,
                HttpHeaders::from(headers),
                body.to_vec(),
                request.request_id().to_string(),
                duration_ms,
            ))
        }
    }
}
