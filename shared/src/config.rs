use std::time::Duration;
use url::Url;

use crate::capabilities::MAX_TIMEOUT_MS;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::DEFAULT_REQUEST_TIMEOUT_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeScheme {
    Ws,
    Wss,
}

impl RealtimeScheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }
}

/// Reverb / Pusher connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub app_key: String,
    pub host: String,
    pub port: u16,
    pub scheme: RealtimeScheme,
}

impl RealtimeConfig {
    pub fn websocket_url(&self) -> String {
        format!(
            "{}://{}:{}/app/{}?protocol={}&client=rust&version={}&flash=false",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.app_key,
            crate::capabilities::PROTOCOL_VERSION,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub broadcast_auth_url: Url,
    pub realtime: Option<RealtimeConfig>,
    pub request_timeout: Duration,
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::new(ErrorKind::Configuration, message)
}

fn parse_url(name: &str, value: &str) -> AppResult<Url> {
    let url = Url::parse(value.trim())
        .map_err(|e| config_error(format!("Invalid {name}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(config_error(format!("Invalid {name}: expected an http(s) URL")));
    }
    Ok(url)
}

impl ClientConfig {
    /// Backend at `api_base_url` with default auth endpoint and timeout and
    /// no realtime server.
    pub fn new(api_base_url: &str) -> AppResult<Self> {
        let api_base_url = parse_url("API_URL", api_base_url)?;
        let broadcast_auth_url = Self::default_auth_url(&api_base_url)?;
        Ok(Self {
            api_base_url,
            broadcast_auth_url,
            realtime: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get("API_URL").ok_or_else(|| config_error("API_URL is not set"))?;
        let mut config = Self::new(&api_url)?;

        if let Some(auth) = get("BROADCAST_AUTH_URL") {
            config.broadcast_auth_url = parse_url("BROADCAST_AUTH_URL", &auth)?;
        }

        if let Some(secs) = get("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| config_error(format!("Invalid REQUEST_TIMEOUT_SECS: {e}")))?;
            let max_secs = MAX_TIMEOUT_MS / 1000;
            if secs == 0 || secs > max_secs {
                return Err(config_error(format!(
                    "REQUEST_TIMEOUT_SECS must be within 1..={max_secs}"
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        if let (Some(app_key), Some(host)) = (get("REVERB_APP_KEY"), get("REVERB_HOST")) {
            let scheme = match get("REVERB_SCHEME").as_deref().map(str::trim) {
                None | Some("https") => RealtimeScheme::Wss,
                Some("http") => RealtimeScheme::Ws,
                Some(other) => {
                    return Err(config_error(format!(
                        "Invalid REVERB_SCHEME: '{other}' (expected http or https)"
                    )))
                }
            };
            let port = match get("REVERB_PORT") {
                Some(port) => port
                    .trim()
                    .parse()
                    .map_err(|e| config_error(format!("Invalid REVERB_PORT: {e}")))?,
                None => scheme.default_port(),
            };
            config.realtime = Some(RealtimeConfig {
                app_key,
                host,
                port,
                scheme,
            });
        }

        Ok(config)
    }

    /// Absolute URL of an API path such as `"/emergency-requests/my"`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn default_auth_url(api_base_url: &Url) -> AppResult<Url> {
        let joined = format!(
            "{}/broadcasting/auth",
            api_base_url.as_str().trim_end_matches('/')
        );
        parse_url("BROADCAST_AUTH_URL", &joined)
    }
}
