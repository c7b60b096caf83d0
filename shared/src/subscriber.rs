use serde_json::json;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    ChannelAuth, ChannelName, ClientFrame, HttpMethod, RealtimeError, RealtimeTransport,
    ServerFrame, SocketId,
};
use crate::context::ClientContext;
use crate::error::{AppError, AppResult};
use crate::event::{RealtimeEvent, CHAT_MESSAGE_EVENT, NEW_CASE_EVENT};
use crate::model::{ChatId, UserId};

/// Which feed a channel carries. Each slot holds at most one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSlot {
    Alerts,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// New-case alerts addressed to a responder.
    CaseAlerts(UserId),
    CaseChat(ChatId),
}

impl ChannelKey {
    pub fn channel_name(&self) -> ChannelName {
        match self {
            Self::CaseAlerts(user_id) => ChannelName::private(format!("emergencies.admin.{user_id}")),
            Self::CaseChat(chat_id) => ChannelName::private(format!("chat.{chat_id}")),
        }
    }

    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::CaseAlerts(_) => NEW_CASE_EVENT,
            Self::CaseChat(_) => CHAT_MESSAGE_EVENT,
        }
    }

    pub const fn slot(&self) -> ChannelSlot {
        match self {
            Self::CaseAlerts(_) => ChannelSlot::Alerts,
            Self::CaseChat(_) => ChannelSlot::Chat,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel_name().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Failed {
        reason: String,
    },
}

impl SubscriptionState {
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Subscribing | Self::Subscribed)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub key: ChannelKey,
    pub state: SubscriptionState,
}

/// Receives decoded events from every subscribed channel.
pub trait EventSink {
    fn deliver(&mut self, event: RealtimeEvent);

    fn channel_failed(&mut self, key: &ChannelKey, error: &AppError);
}

/// Drives one realtime connection and the (at most two) channels the client
/// listens on.
pub struct ChannelSubscriber {
    ctx: Rc<ClientContext>,
    transport: Box<dyn RealtimeTransport>,
    socket_id: Option<SocketId>,
    alerts: Option<SubscriptionHandle>,
    chat: Option<SubscriptionHandle>,
}

impl ChannelSubscriber {
    pub fn new(ctx: Rc<ClientContext>, transport: Box<dyn RealtimeTransport>) -> Self {
        Self {
            ctx,
            transport,
            socket_id: None,
            alerts: None,
            chat: None,
        }
    }

    fn slot_mut(&mut self, slot: ChannelSlot) -> &mut Option<SubscriptionHandle> {
        match slot {
            ChannelSlot::Alerts => &mut self.alerts,
            ChannelSlot::Chat => &mut self.chat,
        }
    }

    pub fn handle(&self, slot: ChannelSlot) -> Option<&SubscriptionHandle> {
        match slot {
            ChannelSlot::Alerts => self.alerts.as_ref(),
            ChannelSlot::Chat => self.chat.as_ref(),
        }
    }

    pub fn state(&self, slot: ChannelSlot) -> SubscriptionState {
        self.handle(slot)
            .map(|h| h.state.clone())
            .unwrap_or_default()
    }

    pub fn socket_id(&self) -> Option<&SocketId> {
        self.socket_id.as_ref()
    }

    fn find_mut(&mut self, channel: &ChannelName) -> Option<&mut SubscriptionHandle> {
        [&mut self.alerts, &mut self.chat]
            .into_iter()
            .flatten()
            .find(|h| &h.key.channel_name() == channel)
    }

    fn set_state(&mut self, slot: ChannelSlot, state: SubscriptionState) {
        if let Some(handle) = self.slot_mut(slot) {
            handle.state = state;
        }
    }

    async fn ensure_connected(&mut self) -> AppResult<SocketId> {
        match &self.socket_id {
            Some(id) if self.transport.is_connected() => Ok(id.clone()),
            _ => {
                let id = self.transport.connect().await?;
                info!(socket_id = %id, "realtime connected");
                self.socket_id = Some(id.clone());
                Ok(id)
            }
        }
    }

    /// Subscribe `key` in its slot, replacing whatever channel occupied it.
    /// A live subscription to the same key is left alone.
    #[instrument(skip(self), fields(channel = %key))]
    pub async fn start(&mut self, key: ChannelKey) -> AppResult<()> {
        let slot = key.slot();
        if let Some(current) = self.handle(slot) {
            if current.key == key && current.state.is_live() {
                debug!("already subscribed");
                return Ok(());
            }
        }
        self.stop(slot).await;

        *self.slot_mut(slot) = Some(SubscriptionHandle {
            key: key.clone(),
            state: SubscriptionState::Subscribing,
        });

        let socket_id = match self.ensure_connected().await {
            Ok(id) => id,
            Err(e) => {
                self.set_state(slot, SubscriptionState::Unsubscribed);
                return Err(e);
            }
        };

        let channel = key.channel_name();
        let auth = match self.authorize_channel(&socket_id, &channel).await {
            Ok(auth) => auth,
            Err(e) => {
                warn!(error = %e, "channel authorization failed");
                self.set_state(
                    slot,
                    SubscriptionState::Failed {
                        reason: e.message.clone(),
                    },
                );
                return Err(e);
            }
        };

        if let Err(e) = self
            .transport
            .send(ClientFrame::Subscribe {
                channel,
                auth: auth.auth,
            })
            .await
        {
            self.set_state(slot, SubscriptionState::Unsubscribed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Ask the backend to sign `channel` for this socket. Rejections other
    /// than a dead credential become `ChannelAuthFailure`.
    async fn authorize_channel(
        &self,
        socket_id: &SocketId,
        channel: &ChannelName,
    ) -> AppResult<ChannelAuth> {
        let url = self.ctx.config().broadcast_auth_url.to_string();
        let request = self
            .ctx
            .authorize(self.ctx.request_to(HttpMethod::Post, url)?)?
            .with_json(&json!({
                "socket_id": socket_id,
                "channel_name": channel,
            }))?;
        self.ctx
            .send_json::<ChannelAuth>(request, "Channel authorization failed")
            .await
            .map_err(|e| {
                if e.ends_session() || e.is_transport() {
                    e
                } else {
                    AppError::channel_auth(channel.as_str(), e.message.clone())
                        .with_internal(e.to_string())
                }
            })
    }

    /// Leave the channel in `slot`. Once this returns no event of that
    /// channel is routed, whatever the server still sends.
    #[instrument(skip(self))]
    pub async fn stop(&mut self, slot: ChannelSlot) {
        let Some(handle) = self.slot_mut(slot).take() else {
            return;
        };
        if handle.state.is_live() && self.transport.is_connected() {
            let frame = ClientFrame::Unsubscribe {
                channel: handle.key.channel_name(),
            };
            if let Err(e) = self.transport.send(frame).await {
                warn!(error = %e, channel = %handle.key, "unsubscribe not delivered");
            }
        }
        debug!(channel = %handle.key, "channel stopped");
    }

    /// Leave every channel and close the socket.
    pub async fn stop_all(&mut self) {
        self.stop(ChannelSlot::Chat).await;
        self.stop(ChannelSlot::Alerts).await;
        if self.transport.is_connected() {
            self.transport.close().await;
        }
        self.socket_id = None;
    }

    /// The socket went away: live subscriptions fall back to `Unsubscribed`
    /// and keep their keys so they can be started again.
    pub fn connection_lost(&mut self) {
        self.socket_id = None;
        for handle in [&mut self.alerts, &mut self.chat].into_iter().flatten() {
            if handle.state.is_live() {
                handle.state = SubscriptionState::Unsubscribed;
            }
        }
    }

    /// Keys that were live before the connection dropped.
    pub fn dormant_keys(&self) -> Vec<ChannelKey> {
        [&self.alerts, &self.chat]
            .into_iter()
            .flatten()
            .filter(|h| h.state == SubscriptionState::Unsubscribed)
            .map(|h| h.key.clone())
            .collect()
    }

    /// Next frame from the socket; pending forever while disconnected.
    pub async fn next_frame(&mut self) -> Option<Result<ServerFrame, RealtimeError>> {
        if !self.transport.is_connected() {
            return std::future::pending().await;
        }
        self.transport.next_frame().await
    }

    /// Apply one server frame: protocol bookkeeping here, application events
    /// to `sink`.
    pub async fn handle_frame(&mut self, frame: ServerFrame, sink: &mut dyn EventSink) {
        match frame {
            ServerFrame::Ping => {
                if let Err(e) = self.transport.send(ClientFrame::Pong).await {
                    warn!(error = %e, "pong not delivered");
                }
            }
            ServerFrame::ConnectionEstablished { socket_id, .. } => {
                debug!(%socket_id, "socket id assigned");
                self.socket_id = Some(socket_id);
            }
            ServerFrame::SubscriptionSucceeded { channel } => match self.find_mut(&channel) {
                Some(handle) if handle.state == SubscriptionState::Subscribing => {
                    handle.state = SubscriptionState::Subscribed;
                    info!(%channel, "subscribed");
                }
                _ => debug!(%channel, "ignoring confirmation for inactive channel"),
            },
            ServerFrame::SubscriptionError {
                channel,
                status,
                message,
            } => {
                let Some(handle) = self.find_mut(&channel) else {
                    return;
                };
                handle.state = SubscriptionState::Failed {
                    reason: message.clone(),
                };
                let key = handle.key.clone();
                warn!(%channel, ?status, %message, "subscription rejected");
                let mut error = AppError::channel_auth(channel.as_str(), message);
                if let Some(status) = status {
                    error = error.with_context("http_status", status.to_string());
                }
                sink.channel_failed(&key, &error);
            }
            ServerFrame::Event {
                channel,
                event,
                data,
            } => self.route_event(&channel, &event, data, sink),
            ServerFrame::Error { code, message } => {
                warn!(?code, %message, "realtime server error");
            }
            ServerFrame::Pong | ServerFrame::Other { .. } => {}
        }
    }

    fn route_event(
        &mut self,
        channel: &ChannelName,
        event: &str,
        data: serde_json::Value,
        sink: &mut dyn EventSink,
    ) {
        let Some(handle) = self.find_mut(channel) else {
            debug!(%channel, event, "event for unknown channel dropped");
            return;
        };
        if handle.state != SubscriptionState::Subscribed {
            debug!(%channel, event, state = handle.state.label(), "event before subscription dropped");
            return;
        }
        if event.trim_start_matches('.') != handle.key.event_name() {
            debug!(%channel, event, "unexpected event dropped");
            return;
        }

        let decoded = match RealtimeEvent::decode(event, data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(%channel, event, error = %e, "undecodable event dropped");
                return;
            }
        };
        if let (ChannelKey::CaseChat(expected), RealtimeEvent::ChatMessage(chat)) =
            (&handle.key, &decoded)
        {
            if &chat.chat_id != expected {
                warn!(%channel, got = %chat.chat_id, "message for another chat dropped");
                return;
            }
        }
        sink.deliver(decoded);
    }
}
