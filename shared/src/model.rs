use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;


// --- Identifiers ---
//
// The backend hands out integer keys for users, cases and chats and UUIDs for
// notifications; JSON payloads are not consistent about quoting either. Ids
// are kept as text and go back on the wire as numbers when they are numeric.

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self.0.parse::<i64>() {
                    Ok(n) => serializer.serialize_i64(n),
                    Err(_) => serializer.serialize_str(&self.0),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into()))
            }
        }
    };
}

typed_id!(UserId);
typed_id!(CaseId);
typed_id!(ChatId);
typed_id!(NotificationId);
typed_id!(MessageId);

// --- Timestamps ---

/// Accepts RFC 3339 (`2024-05-01T12:00:00.000000Z`) and the bare
/// `2024-05-01 12:00:00` form Laravel emits for uncast columns.
pub(crate) mod timestamp {
    use super::{DateTime, NaiveDateTime, Utc, Value};
    use serde::{Deserialize, Deserializer};

    pub fn parse(text: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'"))),
            Some(other) => Err(serde::de::Error::custom(format!(
                "invalid timestamp {other}"
            ))),
        }
    }
}

// --- Identity ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Pet owner who submits emergencies.
    #[default]
    Client,
    Veterinarian,
}

impl Role {
    pub const CLIENT_ROLE_ID: &'static str = "2";
    pub const VETERINARIAN_ROLE_ID: &'static str = "1";

    #[must_use]
    pub fn from_role_id(role_id: &str) -> Self {
        if role_id.trim() == Self::CLIENT_ROLE_ID {
            Self::Client
        } else {
            Self::Veterinarian
        }
    }

    #[must_use]
    pub const fn role_id(self) -> &'static str {
        match self {
            Self::Client => Self::CLIENT_ROLE_ID,
            Self::Veterinarian => Self::VETERINARIAN_ROLE_ID,
        }
    }

    #[must_use]
    pub const fn is_responder(self) -> bool {
        matches!(self, Self::Veterinarian)
    }
}

#[derive(Deserialize)]
struct UserRecord {
    id: UserId,
    name: String,
    email: String,
    #[serde(default)]
    age: Option<u32>,
    #[serde(default)]
    role_id: Option<RawId>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    specialization: Option<String>,
    #[serde(default, alias = "isAvailable")]
    is_available: Option<bool>,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        let role = match (record.role_id, record.role) {
            (Some(role_id), _) => Role::from_role_id(&String::from(role_id)),
            (None, Some(role)) => role,
            (None, None) => Role::default(),
        };
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            age: record.age,
            role,
            specialization: record.specialization,
            is_available: record.is_available,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "UserRecord")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
}

/// Authenticated identity plus its bearer credential.
#[derive(Clone, Debug)]
pub struct Session {
    pub user: User,
    pub token: SecretString,
}

impl Session {
    pub fn new(user: User, token: impl Into<String>) -> Self {
        Self {
            user,
            token: SecretString::new(token.into()),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            token: self.token.expose_secret().clone(),
        }
    }
}

/// Storage form of a [`Session`].
#[derive(Serialize, Deserialize)]
pub struct PersistedSession {
    pub user: User,
    pub token: String,
}

impl From<PersistedSession> for Session {
    fn from(persisted: PersistedSession) -> Self {
        Session::new(persisted.user, persisted.token)
    }
}

impl fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSession")
            .field("user", &self.user)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// `POST /login` and `POST /register` reply.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(alias = "access_token")]
    pub token: SecretString,
    pub user: User,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationFields {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub role: Role,
    pub age: Option<u32>,
}

impl RegistrationFields {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name is required".into());
        }
        if !self.email.contains('@') {
            return Err("A valid email is required".into());
        }
        if self.password.is_empty() {
            return Err("Password is required".into());
        }
        if self.password != self.password_confirmation {
            return Err("Password confirmation does not match".into());
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut body = serde_json::json!({
            "name": self.name.trim(),
            "email": self.email.trim(),
            "password": self.password,
            "password_confirmation": self.password_confirmation,
            "role_id": self.role.role_id(),
        });
        if let Some(age) = self.age {
            body["age"] = age.into();
        }
        body
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.password.is_none()
    }
}

// --- Emergency cases ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("case is already {0}")]
    SameStatus(&'static str),
    #[error("case is {0} and cannot change")]
    FromTerminalStatus(&'static str),
    #[error("cannot move a case from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

impl CaseStatus {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
            Self::Completed => "Completed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }

    #[must_use]
    pub const fn valid_transitions(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Accepted, Self::Rejected],
            Self::Accepted => &[Self::Completed],
            Self::Rejected | Self::Completed => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn validate_transition(self, to: Self) -> Result<(), TransitionError> {
        if self == to {
            return Err(TransitionError::SameStatus(self.as_str()));
        }
        if self.is_terminal() {
            return Err(TransitionError::FromTerminalStatus(self.as_str()));
        }
        if !self.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leading numeric value of `text`, the way `parseFloat` reads it:
/// `"12.5"` is 12.5, `"25kg"` is 25, `"kg"` is nothing.
#[must_use]
pub fn parse_weight(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;

    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        if digits > 0 || frac_end > frac_start {
            digits += frac_end - frac_start;
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok().filter(|w| w.is_finite())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WeightText {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaseError {
    #[error("case {id}: weight '{weight}' is not a number")]
    InvalidWeight { id: CaseId, weight: String },
    #[error("case {id}: unknown status '{status}'")]
    UnknownStatus { id: CaseId, status: String },
    #[error("case {0} is accepted but has no chat")]
    AcceptedWithoutChat(CaseId),
}

#[derive(Deserialize)]
struct CaseRecord {
    id: CaseId,
    #[serde(default)]
    client_id: Option<UserId>,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    assigned_vet_id: Option<UserId>,
    #[serde(default)]
    vet_name: Option<String>,
    species: String,
    weight: WeightText,
    breed: String,
    symptoms: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    chat_id: Option<ChatId>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    accepted_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<CaseRecord> for EmergencyCase {
    type Error = CaseError;

    fn try_from(record: CaseRecord) -> Result<Self, Self::Error> {
        let weight = match record.weight {
            WeightText::Number(w) if w.is_finite() => w,
            WeightText::Number(w) => {
                return Err(CaseError::InvalidWeight {
                    id: record.id,
                    weight: w.to_string(),
                })
            }
            WeightText::Text(text) => {
                parse_weight(&text).ok_or_else(|| CaseError::InvalidWeight {
                    id: record.id.clone(),
                    weight: text,
                })?
            }
        };

        let status = match record.status.as_deref() {
            None => CaseStatus::Pending,
            Some(text) => CaseStatus::parse(text).ok_or_else(|| CaseError::UnknownStatus {
                id: record.id.clone(),
                status: text.to_string(),
            })?,
        };

        let chat_id = match (status, record.chat_id) {
            (CaseStatus::Accepted, None) => return Err(CaseError::AcceptedWithoutChat(record.id)),
            (CaseStatus::Accepted, chat) => chat,
            (_, _) => None,
        };

        Ok(Self {
            id: record.id,
            client_id: record.client_id,
            client_name: record.client_name,
            assigned_vet_id: record.assigned_vet_id,
            vet_name: record.vet_name,
            species: record.species,
            weight,
            breed: record.breed,
            symptoms: record.symptoms,
            description: record.description.unwrap_or_default(),
            status,
            chat_id,
            accepted_at: record.accepted_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// An emergency request. Only accepted cases carry a chat, and every
/// accepted case does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CaseRecord")]
pub struct EmergencyCase {
    pub id: CaseId,
    pub client_id: Option<UserId>,
    pub client_name: Option<String>,
    pub assigned_vet_id: Option<UserId>,
    pub vet_name: Option<String>,
    pub species: String,
    pub weight: f64,
    pub breed: String,
    pub symptoms: String,
    pub description: String,
    pub status: CaseStatus,
    chat_id: Option<ChatId>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl EmergencyCase {
    pub fn chat_id(&self) -> Option<&ChatId> {
        self.chat_id.as_ref()
    }

    pub fn has_chat(&self) -> bool {
        self.status == CaseStatus::Accepted && self.chat_id.is_some()
    }

    /// When the 24-hour chat window started, if the server told us.
    pub fn chat_activated_at(&self) -> Option<DateTime<Utc>> {
        self.accepted_at.or(self.updated_at)
    }

    pub fn title(&self) -> String {
        format!("{} - {}", self.species, self.breed)
    }
}

/// Fields of a new emergency request, as typed by the requester.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFields {
    pub species: String,
    /// Kept as text; the backend stores what the requester typed.
    pub weight: String,
    pub breed: String,
    pub symptoms: String,
    #[serde(default)]
    pub description: String,
}

impl CaseFields {
    pub fn validate(&self) -> Result<f64, String> {
        for (label, value) in [
            ("Species", &self.species),
            ("Breed", &self.breed),
            ("Symptoms", &self.symptoms),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{label} is required"));
            }
        }
        match parse_weight(&self.weight) {
            Some(w) if w > 0.0 => Ok(w),
            _ => Err("Weight must be a positive number".into()),
        }
    }
}

/// Server acknowledgement of a state change, with the updated case when the
/// backend returned it.
#[derive(Clone, Debug, PartialEq)]
pub struct Confirmation {
    pub message: String,
    pub case: Option<EmergencyCase>,
}

impl Confirmation {
    pub fn from_value(value: &Value, default_message: &str) -> Self {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default_message)
            .to_string();

        let case = ["data", "emergency_request", "emergencyRequest"]
            .iter()
            .filter_map(|key| value.get(*key))
            .chain(std::iter::once(value))
            .find_map(|candidate| serde_json::from_value(candidate.clone()).ok());

        Self { message, case }
    }
}

// --- Notifications ---

fn lenient_case<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<EmergencyCase>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match serde_json::from_value(v) {
        Ok(case) => Some(case),
        Err(e) => {
            tracing::warn!(error = %e, "notification payload is not a case");
            None
        }
    }))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(default)]
    pub notifiable_id: Option<UserId>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_case")]
    pub data: Option<EmergencyCase>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }

    pub fn case(&self) -> Option<&EmergencyCase> {
        self.data.as_ref()
    }
}

// --- Chat ---

#[derive(Deserialize)]
struct SenderRecord {
    #[serde(default)]
    id: Option<UserId>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct MessageRecord {
    id: MessageId,
    chat_id: ChatId,
    #[serde(default, alias = "user_id")]
    sender_id: Option<UserId>,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default, alias = "user")]
    sender: Option<SenderRecord>,
    #[serde(alias = "message", alias = "content")]
    body: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = String;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let (nested_id, nested_name) = record
            .sender
            .map_or((None, None), |s| (s.id, s.name));
        let sender_id = record
            .sender_id
            .or(nested_id)
            .ok_or_else(|| format!("message {} has no sender", record.id))?;
        Ok(Self {
            id: record.id,
            chat_id: record.chat_id,
            sender_id,
            sender_name: record.sender_name.or(nested_name),
            body: record.body,
            created_at: record.created_at,
        })
    }
}

/// One chat line. Order within a transcript is the server's order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}
