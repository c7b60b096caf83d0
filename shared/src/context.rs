use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, instrument, warn};

use crate::capabilities::{Capabilities, HttpMethod, HttpRequest, HttpResponse};
use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Session, User};

/// State shared by every component: configuration, capabilities and the
/// current session. Components hold it behind an `Rc`; only the session
/// store replaces the session.
pub struct ClientContext {
    config: ClientConfig,
    caps: Capabilities,
    session: RefCell<Option<Session>>,
}

impl ClientContext {
    pub fn new(config: ClientConfig, caps: Capabilities) -> Rc<Self> {
        Rc::new(Self {
            config,
            caps,
            session: RefCell::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.caps.clock.now()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.session.borrow().as_ref().map(|s| s.user.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub(crate) fn replace_session(&self, session: Option<Session>) -> Option<Session> {
        self.session.replace(session)
    }

    /// Unauthenticated request to an API path.
    pub fn request(&self, method: HttpMethod, path: &str) -> AppResult<HttpRequest> {
        self.request_to(method, self.config.endpoint(path))
    }

    pub fn request_to(&self, method: HttpMethod, url: impl Into<String>) -> AppResult<HttpRequest> {
        Ok(HttpRequest::new(method, url)?
            .with_header("Accept", "application/json")?
            .with_timeout(self.config.request_timeout)?)
    }

    /// Attach the bearer credential. Without a session this fails with
    /// `Unauthenticated` before anything reaches the network.
    pub fn authorize(&self, request: HttpRequest) -> AppResult<HttpRequest> {
        let bearer = self
            .session
            .borrow()
            .as_ref()
            .map(Session::bearer)
            .ok_or_else(AppError::unauthenticated)?;
        Ok(request.with_header("Authorization", bearer)?)
    }

    /// Authorized request to an API path.
    pub fn authorized(&self, method: HttpMethod, path: &str) -> AppResult<HttpRequest> {
        self.authorize(self.request(method, path)?)
    }

    /// Execute and map non-2xx replies to errors, preferring the backend's
    /// own message over `fallback`.
    #[instrument(
        skip(self, request),
        fields(method = %request.method(), path = %request.url().path())
    )]
    pub async fn execute(&self, request: HttpRequest, fallback: &str) -> AppResult<HttpResponse> {
        let path = request.url().path().to_string();
        let response = self
            .caps
            .http
            .execute(request)
            .await
            .map_err(|e| AppError::from(e).with_context("endpoint", path.clone()))?;

        if response.is_success() {
            debug!(status = response.status(), "request succeeded");
            Ok(response)
        } else {
            let err = AppError::from_http_status(response.status(), Some(response.body()), fallback)
                .with_context("endpoint", path);
            warn!(status = response.status(), code = err.code(), "request rejected");
            Err(err)
        }
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        fallback: &str,
    ) -> AppResult<T> {
        let path = request.url().path().to_string();
        let response = self.execute(request, fallback).await?;
        decode_body(&path, response.body())
    }

    pub async fn send_value(&self, request: HttpRequest, fallback: &str) -> AppResult<Value> {
        let path = request.url().path().to_string();
        let response = self.execute(request, fallback).await?;
        if response.body().iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        decode_body(&path, response.body())
    }

    pub async fn send_empty(&self, request: HttpRequest, fallback: &str) -> AppResult<()> {
        self.execute(request, fallback).await.map(|_| ())
    }
}

/// Decode a reply that may or may not be wrapped in a `{"data": ...}`
/// envelope.
pub(crate) fn decode_body<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> AppResult<T> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::unexpected_response(endpoint, format!("invalid JSON: {e}")))?;
    decode_value(endpoint, value)
}

pub(crate) fn decode_value<T: DeserializeOwned>(endpoint: &str, value: Value) -> AppResult<T> {
    let inner = value.get("data").cloned();
    match serde_json::from_value::<T>(value) {
        Ok(decoded) => Ok(decoded),
        Err(bare_err) => match inner {
            Some(data) => serde_json::from_value(data)
                .map_err(|e| AppError::unexpected_response(endpoint, e.to_string())),
            None => Err(AppError::unexpected_response(endpoint, bare_err.to_string())),
        },
    }
}
