use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::capabilities::{RealtimeError, RealtimeTransport, ServerFrame};
use crate::context::ClientContext;
use crate::emergency::EmergencyRepository;
use crate::error::{AppError, AppResult, ErrorKind, ErrorSeverity};
use crate::event::{Event, RealtimeEvent};
use crate::inbox::{NotificationInbox, PushOutcome};
use crate::model::{CaseId, EmergencyCase, Message, Notification, Role, Session, User};
use crate::session::SessionStore;
use crate::subscriber::{ChannelKey, ChannelSlot, ChannelSubscriber, EventSink};
use crate::transcript::ChatTranscript;
use crate::TOAST_DURATION_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    #[default]
    Loading,
    Unauthenticated,
    Authenticating,
    Dashboard,
    Chat,
}

impl AppState {
    #[must_use]
    pub const fn requires_auth(self) -> bool {
        matches!(self, Self::Dashboard | Self::Chat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastMessage {
    pub message: String,
    pub kind: ToastKind,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToastMessage {
    pub fn new(message: impl Into<String>, kind: ToastKind, now: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            kind,
            created_at: now,
            duration_ms: TOAST_DURATION_MS,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let elapsed = (now - self.created_at).num_milliseconds();
        u64::try_from(elapsed).is_ok_and(|ms| ms >= self.duration_ms)
    }
}

#[derive(Debug, Default)]
pub struct Model {
    pub state: AppState,
    pub cases: Vec<EmergencyCase>,
    pub active_error: Option<AppError>,
    pub active_toast: Option<ToastMessage>,
}

impl Model {
    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub fn show_toast(&mut self, message: impl Into<String>, kind: ToastKind, now: DateTime<Utc>) {
        self.active_toast = Some(ToastMessage::new(message, kind, now));
    }
}

// --- View ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToastView {
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CaseItem {
    pub id: String,
    pub title: String,
    pub species: String,
    pub breed: String,
    pub weight_kg: f64,
    pub symptoms: String,
    pub description: String,
    pub status: String,
    pub client_name: Option<String>,
    pub vet_name: Option<String>,
    pub has_chat: bool,
    pub created_at: Option<String>,
}

impl From<&EmergencyCase> for CaseItem {
    fn from(case: &EmergencyCase) -> Self {
        Self {
            id: case.id.to_string(),
            title: case.title(),
            species: case.species.clone(),
            breed: case.breed.clone(),
            weight_kg: case.weight,
            symptoms: case.symptoms.clone(),
            description: case.description.clone(),
            status: case.status.display_name().to_string(),
            client_name: case.client_name.clone(),
            vet_name: case.vet_name.clone(),
            has_chat: case.has_chat(),
            created_at: case.created_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NotificationItem {
    pub id: String,
    pub case: Option<CaseItem>,
    pub received_at: Option<String>,
}

impl From<&Notification> for NotificationItem {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.to_string(),
            case: n.case().map(CaseItem::from),
            received_at: n.created_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageItem {
    pub id: String,
    pub sender_name: String,
    pub body: String,
    pub is_mine: bool,
    pub sent_at: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatView {
    pub case_id: String,
    pub chat_id: String,
    pub counterpart: Option<String>,
    pub messages: Vec<MessageItem>,
    pub countdown: String,
    pub remaining_secs: i64,
    pub can_send: bool,
    pub expired: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelStates {
    pub alerts: String,
    pub chat: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub state: AppState,
    pub is_authenticated: bool,
    pub user: Option<UserSummary>,
    pub cases: Vec<CaseItem>,
    pub active_case: Option<CaseItem>,
    pub notifications: Vec<NotificationItem>,
    pub chat: Option<ChatView>,
    pub channels: ChannelStates,
    pub error: Option<UserFacingError>,
    pub toast: Option<ToastView>,
}

/// Everything one realtime frame produced, applied once the subscriber is
/// done with the frame.
#[derive(Default)]
struct Dispatch {
    events: Vec<RealtimeEvent>,
    failures: Vec<(ChannelKey, AppError)>,
}

impl EventSink for Dispatch {
    fn deliver(&mut self, event: RealtimeEvent) {
        self.events.push(event);
    }

    fn channel_failed(&mut self, key: &ChannelKey, error: &AppError) {
        self.failures.push((key.clone(), error.clone()));
    }
}

/// The client core. Events go in through [`App::update`], which never
/// fails: errors end up on the model for the shell to show.
pub struct App {
    ctx: Rc<ClientContext>,
    session: SessionStore,
    emergencies: EmergencyRepository,
    inbox: NotificationInbox,
    subscriber: Option<ChannelSubscriber>,
    transcript: Option<ChatTranscript>,
    model: Model,
}

impl App {
    /// `transport` is `None` when no realtime server is configured; the app
    /// then works from pulls alone.
    pub fn new(ctx: Rc<ClientContext>, transport: Option<Box<dyn RealtimeTransport>>) -> Self {
        Self {
            session: SessionStore::new(Rc::clone(&ctx)),
            emergencies: EmergencyRepository::new(Rc::clone(&ctx)),
            inbox: NotificationInbox::new(Rc::clone(&ctx)),
            subscriber: transport.map(|t| ChannelSubscriber::new(Rc::clone(&ctx), t)),
            transcript: None,
            model: Model::default(),
            ctx,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn context(&self) -> &Rc<ClientContext> {
        &self.ctx
    }

    pub fn transcript(&self) -> Option<&ChatTranscript> {
        self.transcript.as_ref()
    }

    /// The once-a-second tick only runs while a chat is on screen.
    pub fn wants_ticks(&self) -> bool {
        self.transcript.is_some()
    }

    /// Next frame from the realtime socket; pending when there is none.
    pub async fn next_realtime_frame(&mut self) -> Option<Result<ServerFrame, RealtimeError>> {
        match self.subscriber.as_mut() {
            Some(subscriber) => subscriber.next_frame().await,
            None => std::future::pending().await,
        }
    }

    pub async fn update(&mut self, event: Event) {
        let event_name = event.name();
        if event.is_user_initiated() {
            debug!(event = event_name, "user action");
        }
        self.expire_toast();

        let result = match event {
            Event::Noop => Ok(()),
            Event::AppStarted => self.start().await,
            Event::LoginRequested { email, password } => {
                self.model.state = AppState::Authenticating;
                let outcome = self.session.login(&email, &password).await;
                self.signed_in(outcome).await
            }
            Event::RegisterRequested(registration) => {
                self.model.state = AppState::Authenticating;
                let outcome = self.session.register(&registration).await;
                self.signed_in(outcome).await
            }
            Event::LogoutRequested => self.logout().await,
            Event::ProfileUpdateRequested(update) => self.update_profile(&update).await,
            Event::ProfileDeleteRequested => self.delete_profile().await,
            Event::DashboardRefreshRequested => self.refresh_dashboard().await,
            Event::CreateCaseRequested(case_fields) => self.create_case(&case_fields).await,
            Event::AcceptCaseRequested {
                case_id,
                notification_id,
            } => self.accept_case(&case_id, notification_id).await,
            Event::DismissNotification { notification_id } => {
                self.inbox.acknowledge(&notification_id).await.map(|_| ())
            }
            Event::OpenChat { case_id } => self.open_chat(&case_id).await,
            Event::CloseChat => {
                self.close_chat().await;
                Ok(())
            }
            Event::SendMessage { body } => self.send_message(&body).await,
            Event::RealtimeFrame(frame) => self.handle_frame(frame).await,
            Event::RealtimeFailed(error) => self.realtime_failed(error).await,
            Event::RealtimeDisconnected => self.reconnect().await,
            Event::TimerTick => Ok(()),
            Event::DismissError => {
                self.model.clear_error();
                Ok(())
            }
            Event::DismissToast => {
                self.model.active_toast = None;
                Ok(())
            }
        };

        if let Err(error) = result {
            self.fail(error).await;
        }
    }

    fn expire_toast(&mut self) {
        let now = self.ctx.now();
        if self
            .model
            .active_toast
            .as_ref()
            .is_some_and(|t| t.is_expired(now))
        {
            self.model.active_toast = None;
        }
    }

    async fn fail(&mut self, error: AppError) {
        warn!(code = error.code(), error = %error, "operation failed");
        if error.ends_session() {
            self.teardown().await;
            if let Err(e) = self.session.invalidate().await {
                warn!(error = %e, "could not clear the stored session");
            }
            self.model.state = AppState::Unauthenticated;
        } else if self.model.state == AppState::Authenticating {
            self.model.state = AppState::Unauthenticated;
        }
        self.model.set_error(error);
    }

    /// Drop everything tied to the signed-in identity.
    async fn teardown(&mut self) {
        self.transcript = None;
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber.stop_all().await;
        }
        self.inbox.clear();
        self.model.cases.clear();
    }

    async fn start(&mut self) -> AppResult<()> {
        self.model.state = AppState::Loading;
        match self.session.restore().await? {
            Some(session) => self.enter_dashboard(&session.user).await,
            None => {
                self.model.state = AppState::Unauthenticated;
                Ok(())
            }
        }
    }

    async fn signed_in(&mut self, outcome: AppResult<Session>) -> AppResult<()> {
        let session = outcome?;
        self.model.clear_error();
        self.model.show_toast(
            format!("Welcome, {}", session.user.name),
            ToastKind::Success,
            self.ctx.now(),
        );
        self.enter_dashboard(&session.user).await
    }

    async fn enter_dashboard(&mut self, user: &User) -> AppResult<()> {
        self.model.state = AppState::Dashboard;
        if user.role.is_responder() {
            self.start_channel(ChannelKey::CaseAlerts(user.id.clone()))
                .await?;
        }
        self.refresh_dashboard().await
    }

    /// Channel failures are shown but do not stop the caller; only a dead
    /// credential propagates.
    async fn start_channel(&mut self, key: ChannelKey) -> AppResult<()> {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return Ok(());
        };
        match subscriber.start(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.ends_session() => Err(e),
            Err(e) => {
                self.model.set_error(e);
                Ok(())
            }
        }
    }

    async fn logout(&mut self) -> AppResult<()> {
        self.teardown().await;
        self.session.logout().await?;
        self.model.state = AppState::Unauthenticated;
        self.model.clear_error();
        self.model
            .show_toast("Signed out", ToastKind::Info, self.ctx.now());
        Ok(())
    }

    async fn update_profile(&mut self, update: &crate::model::ProfileUpdate) -> AppResult<()> {
        self.session.update_profile(update).await?;
        self.model
            .show_toast("Profile updated", ToastKind::Success, self.ctx.now());
        Ok(())
    }

    async fn delete_profile(&mut self) -> AppResult<()> {
        self.session.delete_profile().await?;
        self.teardown().await;
        self.model.state = AppState::Unauthenticated;
        self.model
            .show_toast("Profile deleted", ToastKind::Info, self.ctx.now());
        Ok(())
    }

    async fn refresh_dashboard(&mut self) -> AppResult<()> {
        self.model.cases = self.emergencies.list_mine().await?;
        if self.ctx.user().is_some_and(|u| u.role.is_responder()) {
            self.inbox.list_unread().await?;
        }
        Ok(())
    }

    async fn create_case(&mut self, case_fields: &crate::model::CaseFields) -> AppResult<()> {
        let created = self.emergencies.create(case_fields).await?;
        self.model.show_toast(
            format!("Emergency request sent: {}", created.title()),
            ToastKind::Success,
            self.ctx.now(),
        );
        self.model.cases = self.emergencies.list_mine().await?;
        Ok(())
    }

    async fn accept_case(
        &mut self,
        case_id: &CaseId,
        notification_id: Option<crate::model::NotificationId>,
    ) -> AppResult<()> {
        let known_status = self
            .model
            .cases
            .iter()
            .chain(self.inbox.unread().iter().filter_map(|n| n.case()))
            .find(|c| &c.id == case_id)
            .map(|c| c.status);
        let confirmation = self.emergencies.accept(case_id, known_status).await?;
        self.model
            .show_toast(confirmation.message, ToastKind::Success, self.ctx.now());

        // The case is accepted either way, so the dashboard is refreshed
        // before an acknowledge failure is reported.
        let acknowledged = match notification_id {
            Some(id) => self.inbox.acknowledge(&id).await.map(|_| ()),
            None => Ok(()),
        };
        self.refresh_dashboard().await?;
        acknowledged
    }

    async fn open_chat(&mut self, case_id: &CaseId) -> AppResult<()> {
        let case = self
            .model
            .cases
            .iter()
            .find(|c| &c.id == case_id)
            .ok_or_else(|| AppError::new(ErrorKind::NotFound, "Case not found"))?;
        let transcript = ChatTranscript::open(Rc::clone(&self.ctx), case)
            .ok_or_else(|| AppError::validation("This case has no active chat"))?;

        let key = ChannelKey::CaseChat(transcript.chat_id().clone());
        let reopening = self
            .transcript
            .as_ref()
            .is_some_and(|t| t.chat_id() == transcript.chat_id());
        if !reopening {
            self.transcript = Some(transcript);
            info!(%case_id, "chat opened");
        }
        self.model.state = AppState::Chat;

        // Retries a chat channel that dropped or failed; a live one is left alone.
        self.start_channel(key).await?;
        if let Some(transcript) = self.transcript.as_mut().filter(|t| !t.is_loaded()) {
            transcript.load().await?;
        }
        Ok(())
    }

    async fn close_chat(&mut self) {
        self.transcript = None;
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber.stop(ChannelSlot::Chat).await;
        }
        if self.model.state == AppState::Chat {
            self.model.state = AppState::Dashboard;
        }
    }

    async fn send_message(&mut self, body: &str) -> AppResult<()> {
        let transcript = self
            .transcript
            .as_mut()
            .ok_or_else(|| AppError::validation("No chat is open"))?;
        transcript.send(body).await.map(|_| ())
    }

    async fn handle_frame(&mut self, frame: ServerFrame) -> AppResult<()> {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return Ok(());
        };
        let mut dispatch = Dispatch::default();
        subscriber.handle_frame(frame, &mut dispatch).await;

        for (key, error) in dispatch.failures {
            warn!(channel = %key, "channel failed");
            self.model.set_error(error);
        }
        for event in dispatch.events {
            self.apply_realtime(event).await?;
        }
        Ok(())
    }

    async fn apply_realtime(&mut self, event: RealtimeEvent) -> AppResult<()> {
        match event {
            RealtimeEvent::NewCaseAlert(alert) => {
                if self.inbox.ingest(&alert) == PushOutcome::Duplicate {
                    return Ok(());
                }
                let text = alert
                    .message
                    .clone()
                    .unwrap_or_else(|| "New emergency request".to_string());
                self.model.show_toast(text, ToastKind::Alert, self.ctx.now());
                self.refresh_dashboard().await
            }
            RealtimeEvent::ChatMessage(chat) => {
                if let Some(transcript) = self.transcript.as_mut() {
                    let outcome = transcript.append(chat.message);
                    debug!(?outcome, "pushed message");
                }
                Ok(())
            }
        }
    }

    async fn realtime_failed(&mut self, error: RealtimeError) -> AppResult<()> {
        match error {
            RealtimeError::Protocol { message } => {
                warn!(%message, "ignoring malformed frame");
                Ok(())
            }
            RealtimeError::Closed | RealtimeError::Connection { .. } => {
                warn!(error = %error, "realtime connection failed");
                self.reconnect().await
            }
            other => Err(other.into()),
        }
    }

    /// Resubscribe whatever was live before the socket dropped. A single
    /// attempt per disconnect.
    async fn reconnect(&mut self) -> AppResult<()> {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return Ok(());
        };
        subscriber.connection_lost();
        if !self.ctx.is_authenticated() {
            return Ok(());
        }
        for key in subscriber.dormant_keys() {
            self.start_channel(key).await?;
        }
        Ok(())
    }

    pub fn view(&self) -> ViewModel {
        let now = self.ctx.now();
        let user = self.ctx.user();

        let active_case = EmergencyRepository::active_case(&self.model.cases).map(CaseItem::from);
        let chat = self
            .transcript
            .as_ref()
            .map(|t| self.chat_view(t, user.as_ref()));

        let channel_label = |slot: ChannelSlot| {
            self.subscriber
                .as_ref()
                .map_or("unavailable", |s| s.state(slot).label())
                .to_string()
        };

        ViewModel {
            state: self.model.state,
            is_authenticated: user.is_some(),
            user: user.as_ref().map(|u| UserSummary {
                id: u.id.to_string(),
                name: u.name.clone(),
                email: u.email.clone(),
                role: u.role,
            }),
            cases: self.model.cases.iter().map(CaseItem::from).collect(),
            active_case,
            notifications: self.inbox.unread().iter().map(NotificationItem::from).collect(),
            chat,
            channels: ChannelStates {
                alerts: channel_label(ChannelSlot::Alerts),
                chat: channel_label(ChannelSlot::Chat),
            },
            error: self.model.active_error.as_ref().map(UserFacingError::from),
            toast: self
                .model
                .active_toast
                .as_ref()
                .filter(|t| !t.is_expired(now))
                .map(|t| ToastView {
                    message: t.message.clone(),
                    kind: t.kind,
                    duration_ms: t.duration_ms,
                }),
        }
    }

    fn chat_view(&self, transcript: &ChatTranscript, me: Option<&User>) -> ChatView {
        let case = self
            .model
            .cases
            .iter()
            .find(|c| c.id == *transcript.case_id());
        let counterpart = case.and_then(|c| match me.map(|u| u.role) {
            Some(Role::Veterinarian) => c.client_name.clone(),
            _ => c.vet_name.clone(),
        });

        let sender_name = |m: &Message| -> String {
            if let Some(name) = &m.sender_name {
                return name.clone();
            }
            match me {
                Some(u) if u.id == m.sender_id => u.name.clone(),
                _ => counterpart.clone().unwrap_or_else(|| "Unknown".to_string()),
            }
        };

        let remaining = transcript.remaining_secs();
        ChatView {
            case_id: transcript.case_id().to_string(),
            chat_id: transcript.chat_id().to_string(),
            counterpart: counterpart.clone(),
            messages: transcript
                .messages()
                .iter()
                .map(|m| MessageItem {
                    id: m.id.to_string(),
                    sender_name: sender_name(m),
                    body: m.body.clone(),
                    is_mine: me.is_some_and(|u| u.id == m.sender_id),
                    sent_at: m.created_at.map(|t| t.to_rfc3339()),
                })
                .collect(),
            countdown: transcript.countdown(),
            remaining_secs: remaining,
            can_send: remaining > 0,
            expired: remaining == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::{
        mock_capabilities, MockCapabilities, ScriptedTransport, TransportTap,
    };
    use crate::capabilities::{ChannelName, HttpError};
    use crate::config::ClientConfig;
    use crate::model::NotificationId;
    use serde_json::{json, Value};

    fn app() -> (App, MockCapabilities, TransportTap) {
        let mock = mock_capabilities();
        let config = ClientConfig::new("http://localhost:8089/api").unwrap();
        let ctx = ClientContext::new(config, mock.capabilities());
        let (transport, tap) = ScriptedTransport::new();
        (App::new(ctx, Some(Box::new(transport))), mock, tap)
    }

    fn vet_login() -> Value {
        json!({
            "token": "1|vet",
            "user": {"id": 3, "name": "Dr. María García", "email": "maria@vet.com", "role_id": 1}
        })
    }

    fn client_login() -> Value {
        json!({
            "token": "2|client",
            "user": {"id": 5, "name": "Juan Pérez", "email": "juan@cliente.com", "role_id": "2"}
        })
    }

    fn case(id: u64, status: &str, chat: Option<u64>) -> Value {
        let accepted_at = chat.map(|_| "2024-05-01T12:00:00Z");
        json!({
            "id": id, "client_id": 5, "client_name": "Juan Pérez", "vet_name": "María García",
            "species": "perro", "weight": "12.5", "breed": "Labrador", "symptoms": "vómitos",
            "description": "", "status": status, "chat_id": chat, "accepted_at": accepted_at
        })
    }

    async fn login_vet(app: &mut App, mock: &MockCapabilities) {
        mock.http.respond(200, vet_login());
        mock.http.respond(200, json!({"auth": "sig"}));
        mock.http.respond(200, json!([]));
        mock.http.respond(200, json!([]));
        app.update(Event::LoginRequested {
            email: "maria@vet.com".into(),
            password: "123456".into(),
        })
        .await;
        assert_eq!(app.model().state, AppState::Dashboard);
    }

    #[tokio::test]
    async fn test_vet_login_starts_alert_channel_and_pulls() {
        let (mut app, mock, tap) = app();
        login_vet(&mut app, &mock).await;

        let paths: Vec<String> = mock.http.requests().iter().map(|r| r.url().path().to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "/api/login",
                "/api/broadcasting/auth",
                "/api/emergency-requests/my",
                "/api/notifications/unread",
            ]
        );
        assert!(matches!(
            &tap.sent()[..],
            [crate::capabilities::ClientFrame::Subscribe { channel, .. }]
                if channel.as_str() == "private-emergencies.admin.3"
        ));
        let view = app.view();
        assert_eq!(view.channels.alerts, "subscribing");
        assert_eq!(view.toast.unwrap().message, "Welcome, Dr. María García");
    }

    #[tokio::test]
    async fn test_client_login_skips_alerts_and_inbox() {
        let (mut app, mock, tap) = app();
        mock.http.respond(200, client_login());
        mock.http.respond(200, json!([case(41, "accepted", Some(7))]));
        app.update(Event::LoginRequested {
            email: "juan@cliente.com".into(),
            password: "123456".into(),
        })
        .await;

        assert_eq!(mock.http.request_count(), 2);
        assert!(tap.sent().is_empty());
        let view = app.view();
        assert_eq!(view.active_case.unwrap().id, "41");
        assert_eq!(view.channels.alerts, "unsubscribed");
    }

    #[tokio::test]
    async fn test_failed_login_stays_unauthenticated() {
        let (mut app, mock, _tap) = app();
        mock.http.respond(401, json!({"message": "Credenciales inválidas"}));
        app.update(Event::LoginRequested {
            email: "maria@vet.com".into(),
            password: "mal".into(),
        })
        .await;
        let view = app.view();
        assert_eq!(view.state, AppState::Unauthenticated);
        assert_eq!(view.error.unwrap().message, "Credenciales inválidas");
    }

    #[tokio::test]
    async fn test_fresh_alert_toasts_and_repulls_duplicate_does_nothing() {
        let (mut app, mock, _tap) = app();
        login_vet(&mut app, &mock).await;
        let channel = ChannelName::private("emergencies.admin.3");
        app.update(Event::RealtimeFrame(ServerFrame::SubscriptionSucceeded {
            channel: channel.clone(),
        }))
        .await;

        let alert = ServerFrame::Event {
            channel,
            event: ".EmergencyNotification".into(),
            data: json!({"id": "n-1", "message": "Nueva emergencia: perro", "data": case(41, "pending", None)}),
        };
        mock.http.respond(200, json!([case(41, "pending", None)]));
        mock.http.respond(200, json!([]));
        let before = mock.http.request_count();
        app.update(Event::RealtimeFrame(alert.clone())).await;
        assert_eq!(mock.http.request_count(), before + 2);
        assert_eq!(app.view().toast.unwrap().message, "Nueva emergencia: perro");

        app.update(Event::DismissToast).await;
        app.update(Event::RealtimeFrame(alert)).await;
        assert_eq!(mock.http.request_count(), before + 2);
        assert!(app.view().toast.is_none());
    }

    #[tokio::test]
    async fn test_expired_credential_returns_to_login() {
        let (mut app, mock, tap) = app();
        login_vet(&mut app, &mock).await;

        mock.http.respond(401, json!({"message": "Unauthenticated."}));
        app.update(Event::DashboardRefreshRequested).await;

        let view = app.view();
        assert_eq!(view.state, AppState::Unauthenticated);
        assert!(!view.is_authenticated);
        assert!(view.cases.is_empty());
        assert!(!tap.is_connected());
    }

    #[tokio::test]
    async fn test_chat_lifecycle_and_ticks() {
        let (mut app, mock, tap) = app();
        mock.http.respond(200, client_login());
        mock.http.respond(200, json!([case(41, "accepted", Some(7))]));
        app.update(Event::LoginRequested {
            email: "juan@cliente.com".into(),
            password: "123456".into(),
        })
        .await;
        assert!(!app.wants_ticks());

        mock.http.respond(200, json!({"auth": "sig"}));
        mock.http.respond(200, json!([{"id": 1, "chat_id": 7, "user_id": 3, "message": "Hola, soy la Dra."}]));
        app.update(Event::OpenChat {
            case_id: CaseId::from(41),
        })
        .await;
        assert!(app.wants_ticks());

        let view = app.view();
        assert_eq!(view.state, AppState::Chat);
        let chat = view.chat.unwrap();
        assert_eq!(chat.counterpart.as_deref(), Some("María García"));
        assert_eq!(chat.messages[0].sender_name, "María García");
        assert!(!chat.messages[0].is_mine);
        assert_eq!(chat.countdown, "24:00:00");
        assert!(chat.can_send);

        mock.clock.advance(chrono::Duration::hours(25));
        app.update(Event::TimerTick).await;
        let chat = app.view().chat.unwrap();
        assert!(chat.expired);
        assert_eq!(chat.countdown, "00:00:00");

        app.update(Event::SendMessage { body: "¿Sigue ahí?".into() }).await;
        assert_eq!(app.view().error.unwrap().error_code, ErrorKind::WindowExpired.code());

        app.update(Event::CloseChat).await;
        assert!(!app.wants_ticks());
        assert_eq!(app.model().state, AppState::Dashboard);
        assert!(tap
            .sent()
            .contains(&crate::capabilities::ClientFrame::Unsubscribe {
                channel: ChannelName::private("chat.7")
            }));
    }

    #[tokio::test]
    async fn test_open_chat_for_pending_case_is_benign() {
        let (mut app, mock, _tap) = app();
        mock.http.respond(200, client_login());
        mock.http.respond(200, json!([case(41, "pending", None)]));
        app.update(Event::LoginRequested {
            email: "juan@cliente.com".into(),
            password: "123456".into(),
        })
        .await;
        app.update(Event::OpenChat {
            case_id: CaseId::from(41),
        })
        .await;
        assert_eq!(app.model().state, AppState::Dashboard);
        assert!(app.view().chat.is_none());
        assert!(app.view().error.is_some());
    }

    #[tokio::test]
    async fn test_reopening_reloads_history_that_failed() {
        let (mut app, mock, _tap) = app();
        mock.http.respond(200, client_login());
        mock.http.respond(200, json!([case(41, "accepted", Some(7))]));
        app.update(Event::LoginRequested {
            email: "juan@cliente.com".into(),
            password: "123456".into(),
        })
        .await;

        mock.http.respond(200, json!({"auth": "sig"}));
        mock.http.fail(HttpError::Timeout {
            timeout_ms: 30_000,
            request_id: "r".into(),
        });
        app.update(Event::OpenChat {
            case_id: CaseId::from(41),
        })
        .await;
        let view = app.view();
        assert!(view.error.unwrap().is_retryable);
        assert!(view.chat.unwrap().messages.is_empty());
        assert!(!app.transcript().unwrap().is_loaded());

        mock.http.respond(200, json!([{"id": 1, "chat_id": 7, "user_id": 3, "message": "Hola"}]));
        app.update(Event::OpenChat {
            case_id: CaseId::from(41),
        })
        .await;
        assert_eq!(app.view().chat.unwrap().messages.len(), 1);
        assert!(app.transcript().unwrap().is_loaded());
        assert_eq!(mock.http.pending_replies(), 0);
        assert_eq!(
            mock.http.last_request().unwrap().url().path(),
            "/api/private-chat/7"
        );
    }

    #[tokio::test]
    async fn test_toast_expires_after_five_seconds() {
        let (mut app, mock, _tap) = app();
        mock.http.respond(200, client_login());
        mock.http.respond(200, json!([]));
        app.update(Event::LoginRequested {
            email: "juan@cliente.com".into(),
            password: "123456".into(),
        })
        .await;
        assert!(app.view().toast.is_some());
        mock.clock.advance(chrono::Duration::milliseconds(4_999));
        assert!(app.view().toast.is_some());
        mock.clock.advance(chrono::Duration::milliseconds(1));
        assert!(app.view().toast.is_none());
    }

    #[tokio::test]
    async fn test_accept_acknowledges_the_alert() {
        let (mut app, mock, _tap) = app();
        login_vet(&mut app, &mock).await;

        mock.http.respond(200, json!({"message": "Solicitud aceptada", "data": case(41, "accepted", Some(7))}));
        mock.http.respond(204, Value::Null);
        mock.http.respond(200, json!([]));
        mock.http.respond(200, json!([case(41, "accepted", Some(7))]));
        mock.http.respond(200, json!([]));
        app.update(Event::AcceptCaseRequested {
            case_id: CaseId::from(41),
            notification_id: Some(NotificationId::from("n-1")),
        })
        .await;

        let view = app.view();
        assert!(view.error.is_none());
        assert_eq!(view.toast.unwrap().message, "Solicitud aceptada");
        assert_eq!(view.active_case.unwrap().id, "41");
        assert_eq!(mock.http.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_accept_refreshes_even_when_acknowledge_fails() {
        let (mut app, mock, _tap) = app();
        login_vet(&mut app, &mock).await;

        mock.http.respond(200, json!({"message": "Solicitud aceptada", "data": case(41, "accepted", Some(7))}));
        mock.http.respond(500, json!({"message": "Server Error"}));
        mock.http.respond(200, json!([case(41, "accepted", Some(7))]));
        mock.http.respond(200, json!([]));
        app.update(Event::AcceptCaseRequested {
            case_id: CaseId::from(41),
            notification_id: Some(NotificationId::from("n-1")),
        })
        .await;

        let view = app.view();
        assert_eq!(view.state, AppState::Dashboard);
        assert!(view.is_authenticated);
        assert_eq!(view.error.unwrap().error_code, ErrorKind::Internal.code());
        assert_eq!(view.active_case.unwrap().id, "41");
        assert_eq!(mock.http.pending_replies(), 0);
        assert_eq!(mock.http.last_request().unwrap().url().path(), "/api/notifications/unread");
    }

    #[tokio::test]
    async fn test_accepting_a_case_already_accepted_fails_locally() {
        let (mut app, mock, _tap) = app();
        login_vet(&mut app, &mock).await;
        mock.http.respond(200, json!([case(41, "accepted", Some(7))]));
        mock.http.respond(200, json!([]));
        app.update(Event::DashboardRefreshRequested).await;
        let sent = mock.http.request_count();

        app.update(Event::AcceptCaseRequested {
            case_id: CaseId::from(41),
            notification_id: None,
        })
        .await;

        let view = app.view();
        assert_eq!(view.error.unwrap().error_code, ErrorKind::Conflict.code());
        assert!(view.is_authenticated);
        assert_eq!(mock.http.request_count(), sent);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_session() {
        let (mut app, mock, _tap) = app();
        login_vet(&mut app, &mock).await;
        mock.http.fail(HttpError::Timeout {
            timeout_ms: 30_000,
            request_id: "r".into(),
        });
        app.update(Event::DashboardRefreshRequested).await;
        let view = app.view();
        assert_eq!(view.state, AppState::Dashboard);
        assert!(view.error.unwrap().is_retryable);
    }
}
