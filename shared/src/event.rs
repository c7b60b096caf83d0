use serde_json::Value;

use crate::capabilities::{RealtimeError, ServerFrame};
use crate::context::decode_value;
use crate::error::{AppError, AppResult};
use crate::model::{
    CaseFields, CaseId, ChatId, EmergencyCase, Message, NotificationId, ProfileUpdate,
    RegistrationFields,
};

pub const NEW_CASE_EVENT: &str = "EmergencyNotification";
pub const CHAT_MESSAGE_EVENT: &str = "MessageSent";

/// A new emergency was submitted and a responder should look at it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCaseAlert {
    pub id: NotificationId,
    pub message: Option<String>,
    pub case: Option<EmergencyCase>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageEvent {
    pub chat_id: ChatId,
    pub message: Message,
}

/// Application events carried by realtime channels.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NewCaseAlert(NewCaseAlert),
    ChatMessage(ChatMessageEvent),
}

impl RealtimeEvent {
    /// Decode the payload of a broadcast event. Event names may carry
    /// Echo's leading dot.
    pub fn decode(event: &str, data: Value) -> AppResult<Self> {
        match event.trim_start_matches('.') {
            NEW_CASE_EVENT => Self::decode_alert(data).map(Self::NewCaseAlert),
            CHAT_MESSAGE_EVENT => Self::decode_chat(data).map(Self::ChatMessage),
            other => Err(AppError::unexpected_response(
                "realtime",
                format!("unknown event '{other}'"),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NewCaseAlert(_) => NEW_CASE_EVENT,
            Self::ChatMessage(_) => CHAT_MESSAGE_EVENT,
        }
    }

    fn decode_alert(data: Value) -> AppResult<NewCaseAlert> {
        let id_value = data
            .get("id")
            .or_else(|| data.get("notification_id"))
            .cloned()
            .ok_or_else(|| {
                AppError::unexpected_response(NEW_CASE_EVENT, "alert without an id")
            })?;
        let id: NotificationId = decode_value(NEW_CASE_EVENT, id_value)?;

        let message = data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);

        let case = ["data", "emergency_request", "emergencyRequest", "case"]
            .iter()
            .filter_map(|key| data.get(*key))
            .find_map(|candidate| serde_json::from_value(candidate.clone()).ok());

        Ok(NewCaseAlert { id, message, case })
    }

    fn decode_chat(data: Value) -> AppResult<ChatMessageEvent> {
        let payload = match data.get("message") {
            Some(inner @ Value::Object(_)) => inner.clone(),
            _ => data,
        };
        let message: Message = decode_value(CHAT_MESSAGE_EVENT, payload)?;
        Ok(ChatMessageEvent {
            chat_id: message.chat_id.clone(),
            message,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    AppStarted,

    LoginRequested {
        email: String,
        password: String,
    },
    RegisterRequested(RegistrationFields),
    LogoutRequested,
    ProfileUpdateRequested(ProfileUpdate),
    ProfileDeleteRequested,

    DashboardRefreshRequested,
    CreateCaseRequested(CaseFields),
    /// Accept the case and clear the alert that announced it.
    AcceptCaseRequested {
        case_id: CaseId,
        notification_id: Option<NotificationId>,
    },
    /// Decline an alert: acknowledge it without touching the case.
    DismissNotification {
        notification_id: NotificationId,
    },

    OpenChat {
        case_id: CaseId,
    },
    CloseChat,
    SendMessage {
        body: String,
    },

    RealtimeFrame(ServerFrame),
    RealtimeFailed(RealtimeError),
    RealtimeDisconnected,
    TimerTick,

    DismissError,
    DismissToast,
}

impl Event {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::AppStarted => "app_started",
            Self::LoginRequested { .. } => "login_requested",
            Self::RegisterRequested(_) => "register_requested",
            Self::LogoutRequested => "logout_requested",
            Self::ProfileUpdateRequested(_) => "profile_update_requested",
            Self::ProfileDeleteRequested => "profile_delete_requested",
            Self::DashboardRefreshRequested => "dashboard_refresh_requested",
            Self::CreateCaseRequested(_) => "create_case_requested",
            Self::AcceptCaseRequested { .. } => "accept_case_requested",
            Self::DismissNotification { .. } => "dismiss_notification",
            Self::OpenChat { .. } => "open_chat",
            Self::CloseChat => "close_chat",
            Self::SendMessage { .. } => "send_message",
            Self::RealtimeFrame(_) => "realtime_frame",
            Self::RealtimeFailed(_) => "realtime_failed",
            Self::RealtimeDisconnected => "realtime_disconnected",
            Self::TimerTick => "timer_tick",
            Self::DismissError => "dismiss_error",
            Self::DismissToast => "dismiss_toast",
        }
    }

    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::LoginRequested { .. }
                | Self::RegisterRequested(_)
                | Self::LogoutRequested
                | Self::ProfileUpdateRequested(_)
                | Self::ProfileDeleteRequested
                | Self::DashboardRefreshRequested
                | Self::CreateCaseRequested(_)
                | Self::AcceptCaseRequested { .. }
                | Self::DismissNotification { .. }
                | Self::OpenChat { .. }
                | Self::CloseChat
                | Self::SendMessage { .. }
                | Self::DismissError
                | Self::DismissToast
        )
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::Noop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_alert_with_case() {
        let event = RealtimeEvent::decode(
            ".EmergencyNotification",
            json!({
                "id": "9a1f3c2e-1b7d-4c1e-9a55-0b8f3e2d1c00",
                "message": "Nueva emergencia: perro - Labrador",
                "data": {
                    "id": 41, "species": "perro", "weight": "12.5",
                    "breed": "Labrador", "symptoms": "vómitos", "status": "pending"
                }
            }),
        )
        .unwrap();
        let RealtimeEvent::NewCaseAlert(alert) = event else {
            panic!("expected an alert");
        };
        assert_eq!(alert.id.as_str(), "9a1f3c2e-1b7d-4c1e-9a55-0b8f3e2d1c00");
        assert_eq!(alert.case.unwrap().id, CaseId::from(41));
    }

    #[test]
    fn test_decode_alert_without_id_fails() {
        assert!(RealtimeEvent::decode(NEW_CASE_EVENT, json!({"message": "x"})).is_err());
    }

    #[test]
    fn test_decode_chat_wrapped_and_bare() {
        let wrapped = RealtimeEvent::decode(
            CHAT_MESSAGE_EVENT,
            json!({"message": {"id": 9, "chat_id": 7, "user_id": 3, "message": "Voy en camino"}}),
        )
        .unwrap();
        let bare = RealtimeEvent::decode(
            CHAT_MESSAGE_EVENT,
            json!({"id": 9, "chat_id": 7, "sender_id": 3, "body": "Voy en camino"}),
        )
        .unwrap();
        assert_eq!(wrapped, bare);
        let RealtimeEvent::ChatMessage(chat) = wrapped else {
            panic!("expected a chat message");
        };
        assert_eq!(chat.chat_id, ChatId::from(7));
        assert_eq!(chat.message.body, "Voy en camino");
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(RealtimeEvent::decode("UserTyping", json!({})).is_err());
    }

    #[test]
    fn test_event_metadata() {
        assert_eq!(Event::TimerTick.name(), "timer_tick");
        assert!(!Event::TimerTick.is_user_initiated());
        assert!(Event::SendMessage { body: "hola".into() }.is_user_initiated());
        assert!(matches!(Event::default(), Event::Noop));
    }
}
