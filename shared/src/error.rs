use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::capabilities::{HttpError, KvError, RealtimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Transport,
    Timeout,
    Unauthenticated,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    WindowExpired,
    ChannelAuthFailure,
    Storage,
    Configuration,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::WindowExpired => "WINDOW_EXPIRED",
            Self::ChannelAuthFailure => "CHANNEL_AUTH_FAILURE",
            Self::Storage => "STORAGE_ERROR",
            Self::Configuration => "CONFIG_ERROR",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Transport | Self::Timeout | Self::RateLimited | Self::Storage => {
                ErrorSeverity::Transient
            }

            Self::Unauthenticated
            | Self::Authentication
            | Self::ChannelAuthFailure
            | Self::Configuration
            | Self::Internal => ErrorSeverity::Fatal,

            Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::Conflict
            | Self::WindowExpired
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Transport | Self::Timeout | Self::RateLimited | Self::Storage
        )
    }

    /// The request never produced an application-level answer.
    #[must_use]
    pub const fn is_transport(self) -> bool {
        matches!(self, Self::Transport | Self::Timeout)
    }
}

/// Error body shape returned by the backend (Laravel style).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ApiErrorResponse {
    /// Best human-readable reason in the body, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        let first_field_error = self
            .errors
            .as_ref()
            .and_then(|errors| errors.values().flatten().next().cloned());

        self.message
            .clone()
            .or_else(|| self.error.clone())
            .or(first_field_error)
            .filter(|m| !m.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "No active session")
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn window_expired() -> Self {
        Self::new(ErrorKind::WindowExpired, "The chat window has expired")
    }

    #[must_use]
    pub fn channel_auth(channel: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChannelAuthFailure, reason).with_context("channel", channel)
    }

    /// A response body that does not match the schema expected for the endpoint.
    #[must_use]
    pub fn unexpected_response(endpoint: &str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "Unexpected response from server")
            .with_internal(detail)
            .with_context("endpoint", endpoint)
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub const fn is_transport(&self) -> bool {
        self.kind.is_transport()
    }

    /// Expired, invalid or missing credential: the session cannot continue.
    #[must_use]
    pub const fn ends_session(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Authentication | ErrorKind::Unauthenticated
        )
    }

    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        self.context.get("http_status").and_then(|s| s.parse().ok())
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Transport => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Unauthenticated => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authentication
            | ErrorKind::Authorization
            | ErrorKind::Validation
            | ErrorKind::NotFound
            | ErrorKind::Conflict => self.message.clone(),
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.".into(),
            ErrorKind::WindowExpired => {
                "The 24-hour chat window for this case has closed.".into()
            }
            ErrorKind::ChannelAuthFailure => {
                "Live updates are unavailable right now.".into()
            }
            ErrorKind::Storage => "Unable to save data on this device.".into(),
            ErrorKind::Configuration => {
                "The app is not configured correctly. Please contact support.".into()
            }
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }

    /// Map a non-2xx response into an application error, preferring the
    /// backend's own message over `fallback`.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>, fallback: &str) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            401 | 419 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            408 => ErrorKind::Timeout,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .and_then(|e| e.reason())
            .unwrap_or_else(|| fallback.to_string());

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<HttpError> for AppError {
    fn from(e: HttpError) -> Self {
        match &e {
            HttpError::Timeout { .. } => {
                AppError::new(ErrorKind::Timeout, "Request timed out").with_internal(e.to_string())
            }
            HttpError::ConnectionError { .. } => {
                AppError::new(ErrorKind::Transport, "Network error").with_internal(e.to_string())
            }
            HttpError::InvalidUrl { .. } => {
                AppError::new(ErrorKind::Configuration, "Invalid backend URL")
                    .with_internal(e.to_string())
            }
            HttpError::InvalidResponse { .. } => {
                AppError::unexpected_response("unknown", e.to_string())
            }
            _ => AppError::new(ErrorKind::Internal, "Request could not be built")
                .with_internal(e.to_string()),
        }
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        AppError::new(ErrorKind::Storage, "Local storage error").with_internal(e.to_string())
    }
}

impl From<RealtimeError> for AppError {
    fn from(e: RealtimeError) -> Self {
        match &e {
            RealtimeError::ChannelAuth { channel, reason } => {
                AppError::channel_auth(channel, reason.clone())
            }
            RealtimeError::Connection { .. } | RealtimeError::Closed => {
                AppError::new(ErrorKind::Transport, "Realtime connection lost")
                    .with_internal(e.to_string())
            }
            RealtimeError::Protocol { .. } | RealtimeError::NotConnected => {
                AppError::new(ErrorKind::Internal, "Realtime protocol error")
                    .with_internal(e.to_string())
            }
        }
    }
}
