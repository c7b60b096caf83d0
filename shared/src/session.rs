use std::rc::Rc;
use tracing::{info, instrument, warn};

use crate::capabilities::{load_json, store_json, HttpMethod, KeyNamespace, KeyValueStore, KvKey};
use crate::context::ClientContext;
use crate::error::{AppError, AppResult};
use crate::model::{
    AuthResponse, Credentials, PersistedSession, ProfileUpdate, RegistrationFields, Session, User,
};

const SESSION_KEY: &str = "current";

/// Owns the session lifecycle: sign-in, persistence across reloads and
/// teardown.
pub struct SessionStore {
    ctx: Rc<ClientContext>,
}

impl SessionStore {
    pub fn new(ctx: Rc<ClientContext>) -> Self {
        Self { ctx }
    }

    fn key() -> AppResult<KvKey> {
        Ok(KvKey::new(KeyNamespace::Session, SESSION_KEY)?)
    }

    pub fn current(&self) -> Option<Session> {
        self.ctx.session()
    }

    /// Reload the session saved by a previous run. A record that no longer
    /// decodes is discarded.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> AppResult<Option<Session>> {
        let key = Self::key()?;
        let kv = self.ctx.caps().kv.as_ref();
        let session = match load_json::<PersistedSession>(kv, &key).await {
            Ok(found) => found.map(Session::from),
            Err(e) => {
                warn!(error = %e, "discarding unreadable session record");
                kv.delete(&key).await?;
                None
            }
        };
        if let Some(session) = &session {
            info!(user_id = %session.user.id, "session restored");
        }
        self.ctx.replace_session(session.clone());
        Ok(session)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AppResult<Session> {
        let request = self
            .ctx
            .request(HttpMethod::Post, "/login")?
            .with_json(&Credentials {
                email: email.trim().to_string(),
                password: password.to_string(),
            })?;
        let response: AuthResponse = self.ctx.send_json(request, "Login failed").await?;
        self.establish(response).await
    }

    #[instrument(skip(self, registration), fields(email = %registration.email))]
    pub async fn register(&self, registration: &RegistrationFields) -> AppResult<Session> {
        registration.validate().map_err(AppError::validation)?;
        let request = self
            .ctx
            .request(HttpMethod::Post, "/register")?
            .with_json(&registration.to_json())?;
        let response: AuthResponse = self.ctx.send_json(request, "Registration failed").await?;
        self.establish(response).await
    }

    async fn establish(&self, response: AuthResponse) -> AppResult<Session> {
        let session = Session {
            user: response.user,
            token: response.token,
        };
        store_json(
            self.ctx.caps().kv.as_ref(),
            &Self::key()?,
            &session.to_persisted(),
        )
        .await?;
        self.ctx.replace_session(Some(session.clone()));
        info!(user_id = %session.user.id, role = ?session.user.role, "signed in");
        Ok(session)
    }

    /// Tell the backend (best effort) and forget the session locally.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> AppResult<()> {
        if self.ctx.is_authenticated() {
            let result = match self.ctx.authorized(HttpMethod::Post, "/logout") {
                Ok(request) => self.ctx.send_empty(request, "Logout failed").await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(error = %e, "logout request failed, clearing local session anyway");
            }
        }
        self.clear().await
    }

    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, update: &ProfileUpdate) -> AppResult<User> {
        if update.is_empty() {
            return Err(AppError::validation("Nothing to update"));
        }
        let request = self
            .ctx
            .authorized(HttpMethod::Patch, "/profile")?
            .with_json(update)?;
        let user: User = self.ctx.send_json(request, "Profile update failed").await?;

        let Some(mut session) = self.ctx.session() else {
            return Err(AppError::unauthenticated());
        };
        session.user = user.clone();
        store_json(
            self.ctx.caps().kv.as_ref(),
            &Self::key()?,
            &session.to_persisted(),
        )
        .await?;
        self.ctx.replace_session(Some(session));
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete_profile(&self) -> AppResult<()> {
        let request = self.ctx.authorized(HttpMethod::Delete, "/profile")?;
        self.ctx.send_empty(request, "Profile deletion failed").await?;
        info!("profile deleted");
        self.clear().await
    }

    /// Drop a session whose credential the backend no longer accepts.
    pub async fn invalidate(&self) -> AppResult<()> {
        if self.ctx.is_authenticated() {
            warn!("credential rejected, ending session");
        }
        self.clear().await
    }

    async fn clear(&self) -> AppResult<()> {
        self.ctx.replace_session(None);
        self.ctx.caps().kv.delete(&Self::key()?).await?;
        Ok(())
    }
}
