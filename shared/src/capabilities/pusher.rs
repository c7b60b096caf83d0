use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::realtime::{ClientFrame, RealtimeError, RealtimeTransport, ServerFrame, SocketId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pusher protocol client over a WebSocket (Laravel Reverb, Soketi, Pusher).
pub struct PusherSocket {
    url: String,
    stream: Option<WsStream>,
    activity_timeout: Option<u64>,
    handshake_timeout: Duration,
}

impl PusherSocket {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            activity_timeout: None,
            handshake_timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Upper bound for the TCP/TLS connect plus `pusher:connection_established`.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Server-advertised idle timeout in seconds, once connected.
    pub fn activity_timeout(&self) -> Option<u64> {
        self.activity_timeout
    }

    fn connection_error(e: &tokio_tungstenite::tungstenite::Error) -> RealtimeError {
        RealtimeError::Connection {
            message: e.to_string(),
        }
    }
}

#[async_trait(?Send)]
impl RealtimeTransport for PusherSocket {
    async fn connect(&mut self) -> Result<SocketId, RealtimeError> {
        if let Some(mut old) = self.stream.take() {
            if let Err(e) = old.close(None).await {
                debug!(error = %e, "error while closing previous realtime socket");
            }
        }

        let limit = self.handshake_timeout;
        let (stream, socket_id, activity_timeout) =
            tokio::time::timeout(limit, handshake(&self.url))
                .await
                .map_err(|_| {
                    warn!(timeout = ?limit, "realtime handshake timed out");
                    RealtimeError::Connection {
                        message: format!("no handshake within {}ms", limit.as_millis()),
                    }
                })??;

        info!(%socket_id, "realtime connection established");
        self.activity_timeout = activity_timeout;
        self.stream = Some(stream);
        Ok(socket_id)
    }

    async fn send(&mut self, frame: ClientFrame) -> Result<(), RealtimeError> {
        let stream = self.stream.as_mut().ok_or(RealtimeError::NotConnected)?;
        stream
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| Self::connection_error(&e))
    }

    async fn next_frame(&mut self) -> Option<Result<ServerFrame, RealtimeError>> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(ServerFrame::decode(&text)),
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "realtime connection closed by server");
                    self.stream = None;
                    return None;
                }
                None => {
                    self.stream = None;
                    return None;
                }
                // tungstenite answers websocket-level pings itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.stream = None;
                    return Some(Err(Self::connection_error(&e)));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "error while closing realtime socket");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Open the socket and wait for the server to hand out a socket id.
async fn handshake(url: &str) -> Result<(WsStream, SocketId, Option<u64>), RealtimeError> {
    let (mut stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| PusherSocket::connection_error(&e))?;

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match ServerFrame::decode(&text)? {
                ServerFrame::ConnectionEstablished {
                    socket_id,
                    activity_timeout,
                } => return Ok((stream, socket_id, activity_timeout)),
                ServerFrame::Error { code, message } => {
                    warn!(?code, %message, "realtime server refused connection");
                    return Err(RealtimeError::Connection { message });
                }
                other => debug!(?other, "ignoring frame before handshake"),
            },
            Some(Ok(Message::Close(_))) | None => return Err(RealtimeError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(PusherSocket::connection_error(&e)),
        }
    }
}
