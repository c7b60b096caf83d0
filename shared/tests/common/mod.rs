#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

use vetemergency_shared::capabilities::testing::{ManualClock, ScriptedTransport, TransportTap};
use vetemergency_shared::capabilities::{
    HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpShell, MemoryKv,
};
use vetemergency_shared::{App, Capabilities, ClientConfig, ClientContext};

pub const API: &str = "http://localhost:8089/api";
pub const NOW: &str = "2024-05-01T12:00:00Z";

struct FakeUser {
    id: u64,
    name: String,
    email: String,
    password: String,
    role_id: String,
}

impl FakeUser {
    fn json(&self) -> Value {
        json!({"id": self.id, "name": self.name, "email": self.email, "role_id": self.role_id})
    }

    fn is_vet(&self) -> bool {
        self.role_id != "2"
    }
}

struct FakeCase {
    id: u64,
    client_id: u64,
    vet_id: Option<u64>,
    chat_id: Option<u64>,
    fields: Value,
    status: &'static str,
}

struct FakeNotification {
    id: String,
    user_id: u64,
    case_id: u64,
}

struct FakeMessage {
    id: u64,
    chat_id: u64,
    user_id: u64,
    body: String,
}

#[derive(Default)]
struct BackendState {
    users: Vec<FakeUser>,
    tokens: Vec<(String, u64)>,
    cases: Vec<FakeCase>,
    notifications: Vec<FakeNotification>,
    messages: Vec<FakeMessage>,
    next_id: u64,
    log: Vec<String>,
}

impl BackendState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn user(&self, id: u64) -> Option<&FakeUser> {
        self.users.iter().find(|u| u.id == id)
    }

    fn name(&self, id: Option<u64>) -> Value {
        id.and_then(|id| self.user(id))
            .map_or(Value::Null, |u| Value::from(u.name.clone()))
    }

    fn case_json(&self, case: &FakeCase) -> Value {
        let mut value = case.fields.clone();
        let accepted_at = if case.status == "accepted" { Value::from(NOW) } else { Value::Null };
        let extra = json!({
            "id": case.id,
            "client_id": case.client_id,
            "client_name": self.name(Some(case.client_id)),
            "assigned_vet_id": case.vet_id,
            "vet_name": self.name(case.vet_id),
            "status": case.status,
            "chat_id": case.chat_id,
            "accepted_at": accepted_at,
            "created_at": "2024-05-01 11:55:00",
        });
        if let (Some(target), Some(source)) = (value.as_object_mut(), extra.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        value
    }

    fn message_json(&self, message: &FakeMessage) -> Value {
        json!({
            "id": message.id,
            "chat_id": message.chat_id,
            "user_id": message.user_id,
            "sender_name": self.name(Some(message.user_id)),
            "message": message.body,
            "created_at": NOW,
        })
    }
}

/// In-memory stand-in for the Laravel backend, shared by every actor in a
/// test.
#[derive(Default)]
pub struct FakeBackend {
    state: RefCell<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add_user(&self, id: u64, name: &str, email: &str, role_id: &str) {
        let mut state = self.state.borrow_mut();
        state.users.push(FakeUser {
            id,
            name: name.into(),
            email: email.into(),
            password: "123456".into(),
            role_id: role_id.into(),
        });
        state.next_id = state.next_id.max(id);
    }

    /// Seed a vet (id 3) and a client (id 5).
    pub fn with_default_users() -> Rc<Self> {
        let backend = Self::new();
        backend.add_user(3, "Dr. María García", "maria@vet.com", "1");
        backend.add_user(5, "Juan Pérez", "juan@cliente.com", "2");
        backend
    }

    pub fn log(&self) -> Vec<String> {
        self.state.borrow().log.clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.state.borrow().log.iter().filter(|e| *e == entry).count()
    }

    pub fn case_status(&self, id: u64) -> Option<&'static str> {
        self.state.borrow().cases.iter().find(|c| c.id == id).map(|c| c.status)
    }

    pub fn case_chat(&self, id: u64) -> Option<u64> {
        self.state.borrow().cases.iter().find(|c| c.id == id).and_then(|c| c.chat_id)
    }

    pub fn notification_ids(&self, user_id: u64) -> Vec<String> {
        self.state
            .borrow()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Seed an already-accepted case with its chat.
    pub fn accepted_case(&self, client_id: u64, vet_id: u64) -> (u64, u64) {
        let mut state = self.state.borrow_mut();
        let id = state.next();
        let chat_id = state.next();
        state.cases.push(FakeCase {
            id,
            client_id,
            vet_id: Some(vet_id),
            chat_id: Some(chat_id),
            fields: json!({
                "species": "gato", "weight": "4", "breed": "Siamés",
                "symptoms": "no come", "description": ""
            }),
            status: "accepted",
        });
        (id, chat_id)
    }

    fn route(&self, request: &HttpRequest) -> (u16, Value) {
        let mut state = self.state.borrow_mut();
        let path = request
            .url()
            .path()
            .trim_start_matches("/api")
            .to_string();
        state.log.push(format!("{} {}", request.method(), path));

        let caller = request
            .headers()
            .get("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .and_then(|token| state.tokens.iter().find(|(t, _)| t == token))
            .map(|(_, id)| *id);
        let body = request.json_body().unwrap_or(Value::Null);
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (request.method(), segments.as_slice()) {
            (HttpMethod::Post, ["login"]) => {
                let found = state.users.iter().find(|u| {
                    body["email"] == Value::from(u.email.clone())
                        && body["password"] == Value::from(u.password.clone())
                });
                match found.map(|u| (u.id, u.json())) {
                    Some((id, user)) => {
                        let token = format!("{id}|{}", state.tokens.len() + 1);
                        state.tokens.push((token.clone(), id));
                        (200, json!({"message": "Inicio de sesión exitoso", "token": token, "user": user}))
                    }
                    None => (401, json!({"message": "Credenciales inválidas"})),
                }
            }
            (HttpMethod::Post, ["register"]) => {
                let id = state.next();
                let user = FakeUser {
                    id,
                    name: body["name"].as_str().unwrap_or_default().into(),
                    email: body["email"].as_str().unwrap_or_default().into(),
                    password: body["password"].as_str().unwrap_or_default().into(),
                    role_id: body["role_id"].as_str().unwrap_or("2").into(),
                };
                let json = user.json();
                state.users.push(user);
                let token = format!("{id}|r");
                state.tokens.push((token.clone(), id));
                (201, json!({"token": token, "user": json}))
            }
            (_, _) if caller.is_none() && path != "/broadcasting/auth" => {
                (401, json!({"message": "Unauthenticated."}))
            }
            (HttpMethod::Post, ["logout"]) => (200, json!({"message": "Sesión cerrada"})),
            (HttpMethod::Post, ["broadcasting", "auth"]) => match caller {
                Some(_) => (200, json!({"auth": format!("app-key:{}", body["channel_name"])})),
                None => (403, json!({"message": "Forbidden"})),
            },
            (HttpMethod::Get, ["emergency-requests", "my"]) => {
                let me = caller.unwrap_or_default();
                let cases: Vec<Value> = state
                    .cases
                    .iter()
                    .filter(|c| c.client_id == me || c.vet_id == Some(me))
                    .map(|c| state.case_json(c))
                    .collect();
                (200, json!({"data": cases}))
            }
            (HttpMethod::Post, ["emergency-requests"]) => {
                let me = caller.unwrap_or_default();
                let id = state.next();
                state.cases.push(FakeCase {
                    id,
                    client_id: me,
                    vet_id: None,
                    chat_id: None,
                    fields: body.clone(),
                    status: "pending",
                });
                let vets: Vec<u64> = state.users.iter().filter(|u| u.is_vet()).map(|u| u.id).collect();
                for vet in vets {
                    let n = state.next();
                    state.notifications.push(FakeNotification {
                        id: format!("9a1f3c2e-0000-4000-8000-{n:012}"),
                        user_id: vet,
                        case_id: id,
                    });
                }
                let case = state.cases.last().map(|c| state.case_json(c)).unwrap_or_default();
                (201, json!({"data": case}))
            }
            (HttpMethod::Put, ["emergency-requests", id]) => {
                let me = caller.unwrap_or_default();
                let id: u64 = id.parse().unwrap_or_default();
                let chat = state.next();
                let Some(case) = state.cases.iter_mut().find(|c| c.id == id) else {
                    return (404, json!({"message": "Solicitud no encontrada"}));
                };
                if case.status != "pending" {
                    return (409, json!({"message": "La solicitud ya fue aceptada"}));
                }
                case.status = "accepted";
                case.vet_id = Some(me);
                case.chat_id = Some(chat);
                let case = state.cases.iter().find(|c| c.id == id).map(|c| state.case_json(c));
                (200, json!({"message": "Solicitud aceptada", "data": case}))
            }
            (HttpMethod::Get, ["notifications", "unread"]) => {
                let me = caller.unwrap_or_default();
                let items: Vec<Value> = state
                    .notifications
                    .iter()
                    .filter(|n| n.user_id == me)
                    .map(|n| {
                        let case = state
                            .cases
                            .iter()
                            .find(|c| c.id == n.case_id)
                            .map(|c| state.case_json(c));
                        json!({
                            "id": n.id, "notifiable_id": n.user_id, "read_at": null,
                            "created_at": "2024-05-01 11:55:00", "data": case
                        })
                    })
                    .collect();
                (200, Value::from(items))
            }
            (HttpMethod::Delete, ["notifications", id]) => {
                let me = caller.unwrap_or_default();
                let before = state.notifications.len();
                state.notifications.retain(|n| !(n.id == *id && n.user_id == me));
                if state.notifications.len() < before {
                    (204, Value::Null)
                } else {
                    (404, json!({"message": "Notificación no encontrada"}))
                }
            }
            (HttpMethod::Get, ["private-chat", chat]) => {
                let me = caller.unwrap_or_default();
                let chat: u64 = chat.parse().unwrap_or_default();
                let allowed = state.cases.iter().any(|c| {
                    c.chat_id == Some(chat) && (c.client_id == me || c.vet_id == Some(me))
                });
                if !allowed {
                    return (403, json!({"message": "This action is unauthorized."}));
                }
                let messages: Vec<Value> = state
                    .messages
                    .iter()
                    .filter(|m| m.chat_id == chat)
                    .map(|m| state.message_json(m))
                    .collect();
                (200, json!({"chat": {"id": chat, "messages": messages}}))
            }
            (HttpMethod::Post, ["message"]) => {
                let me = caller.unwrap_or_default();
                let id = state.next();
                let message = FakeMessage {
                    id,
                    chat_id: body["chat_id"].as_u64().unwrap_or_default(),
                    user_id: me,
                    body: body["message"].as_str().unwrap_or_default().into(),
                };
                let json = state.message_json(&message);
                state.messages.push(message);
                (201, json!({"message": json}))
            }
            _ => (404, json!({"message": "Not Found"})),
        }
    }
}

#[async_trait(?Send)]
impl HttpShell for FakeBackend {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let (status, body) = self.route(&request);
        Ok(HttpResponse::json_reply(status, &body))
    }
}

/// One device talking to the shared backend.
pub struct Actor {
    pub app: App,
    pub clock: Rc<ManualClock>,
    pub kv: Rc<MemoryKv>,
    pub tap: TransportTap,
}

pub fn actor(backend: &Rc<FakeBackend>) -> Actor {
    actor_with_store(backend, Rc::new(MemoryKv::new()))
}

/// An actor whose device storage is `kv`, to simulate a reload.
pub fn actor_with_store(backend: &Rc<FakeBackend>, kv: Rc<MemoryKv>) -> Actor {
    let clock = Rc::new(ManualClock::default());
    let caps = Capabilities {
        http: backend.clone(),
        kv: kv.clone(),
        clock: clock.clone(),
    };
    let config = ClientConfig::new(API).unwrap();
    let (transport, tap) = ScriptedTransport::new();
    Actor {
        app: App::new(ClientContext::new(config, caps), Some(Box::new(transport))),
        clock,
        kv,
        tap,
    }
}
