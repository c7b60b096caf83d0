use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const PROTOCOL_VERSION: u8 = 7;
pub const PRIVATE_PREFIX: &str = "private-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(String);

impl SocketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full channel name as it travels on the wire, including the `private-`
/// prefix for authorized channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn private(name: impl AsRef<str>) -> Self {
        Self(format!("{PRIVATE_PREFIX}{}", name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_private(&self) -> bool {
        self.0.starts_with(PRIVATE_PREFIX)
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature returned by the channel authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAuth {
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    ConnectionEstablished {
        socket_id: SocketId,
        activity_timeout: Option<u64>,
    },
    SubscriptionSucceeded {
        channel: ChannelName,
    },
    SubscriptionError {
        channel: ChannelName,
        status: Option<u16>,
        message: String,
    },
    Event {
        channel: ChannelName,
        event: String,
        data: Value,
    },
    Ping,
    Pong,
    Error {
        code: Option<u16>,
        message: String,
    },
    /// A protocol event this client has no use for (presence, cache, ...).
    Other {
        event: String,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct EstablishedData {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

#[derive(Default, Deserialize)]
struct ErrorData {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorData {
    fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self {
                message: Some(s),
                ..Self::default()
            },
            other => serde_json::from_value(other).unwrap_or_default(),
        }
    }

    fn text(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unspecified error".to_string())
    }
}

impl ServerFrame {
    /// Decode one text frame. `data` is frequently a JSON document encoded
    /// as a string; it is unwrapped when it parses.
    pub fn decode(text: &str) -> Result<Self, RealtimeError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| RealtimeError::Protocol {
            message: format!("malformed frame: {e}"),
        })?;

        let data = match raw.data {
            Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            Some(other) => other,
            None => Value::Null,
        };

        let channel = |event: &str| {
            raw.channel
                .clone()
                .map(ChannelName::new)
                .ok_or_else(|| RealtimeError::Protocol {
                    message: format!("'{event}' frame without a channel"),
                })
        };

        let frame = match raw.event.as_str() {
            "pusher:connection_established" => {
                let established: EstablishedData =
                    serde_json::from_value(data).map_err(|e| RealtimeError::Protocol {
                        message: format!("bad connection_established payload: {e}"),
                    })?;
                Self::ConnectionEstablished {
                    socket_id: SocketId(established.socket_id),
                    activity_timeout: established.activity_timeout,
                }
            }
            "pusher_internal:subscription_succeeded" => Self::SubscriptionSucceeded {
                channel: channel(&raw.event)?,
            },
            "pusher:subscription_error" => {
                let err = ErrorData::from_value(data);
                Self::SubscriptionError {
                    channel: channel(&raw.event)?,
                    status: err.status.or(err.code),
                    message: err.text(),
                }
            }
            "pusher:ping" => Self::Ping,
            "pusher:pong" => Self::Pong,
            "pusher:error" => {
                let err = ErrorData::from_value(data);
                Self::Error {
                    code: err.code.or(err.status),
                    message: err.text(),
                }
            }
            other if other.starts_with("pusher:") || other.starts_with("pusher_internal:") => {
                Self::Other {
                    event: other.to_string(),
                }
            }
            _ => Self::Event {
                channel: channel(&raw.event)?,
                event: raw.event,
                data,
            },
        };

        Ok(frame)
    }

    pub fn channel(&self) -> Option<&ChannelName> {
        match self {
            Self::SubscriptionSucceeded { channel }
            | Self::SubscriptionError { channel, .. }
            | Self::Event { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    Subscribe { channel: ChannelName, auth: String },
    Unsubscribe { channel: ChannelName },
    Ping,
    Pong,
}

impl ClientFrame {
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Subscribe { channel, auth } => json!({
                "event": "pusher:subscribe",
                "data": { "auth": auth, "channel": channel },
            }),
            Self::Unsubscribe { channel } => json!({
                "event": "pusher:unsubscribe",
                "data": { "channel": channel },
            }),
            Self::Ping => json!({ "event": "pusher:ping", "data": {} }),
            Self::Pong => json!({ "event": "pusher:pong", "data": {} }),
        };
        value.to_string()
    }

    pub fn channel(&self) -> Option<&ChannelName> {
        match self {
            Self::Subscribe { channel, .. } | Self::Unsubscribe { channel } => Some(channel),
            Self::Ping | Self::Pong => None,
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("connection closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("channel '{channel}' authorization failed: {reason}")]
    ChannelAuth { channel: String, reason: String },
}

/// A pub/sub socket speaking the Pusher channel protocol.
#[async_trait(?Send)]
pub trait RealtimeTransport {
    /// Open the socket and wait for the server to assign a socket id.
    async fn connect(&mut self) -> Result<SocketId, RealtimeError>;

    async fn send(&mut self, frame: ClientFrame) -> Result<(), RealtimeError>;

    /// Next decoded frame, or `None` once the socket is closed. Pending while
    /// the socket is idle.
    async fn next_frame(&mut self) -> Option<Result<ServerFrame, RealtimeError>>;

    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}
