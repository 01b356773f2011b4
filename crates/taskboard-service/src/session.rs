use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use taskboard_core::{Role, User};
use taskboard_gateway::{
    decode_row, AccessToken, AuthBackend, AuthResponse, AuthUser, Collection, DataGateway, Filter,
    Query,
};

use crate::notify::{NotificationOutcome, Notifier};
use crate::BoardError;

/// An authenticated session. Callers hold it and pass it back in; nothing
/// is cached process-wide.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: User,
    pub access_token: AccessToken,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Read view over an optional session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    session: Option<Session>,
}

impl AuthState {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}

/// Result of a sign-up. `session` is `None` while the backend waits for
/// email confirmation.
#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub user: User,
    pub session: Option<Session>,
    pub welcome: NotificationOutcome,
}

pub struct SessionFacade {
    auth: Arc<dyn AuthBackend>,
    gateway: Arc<dyn DataGateway>,
    notifier: Arc<dyn Notifier>,
    /// Credential for calls made before a session exists.
    public_token: AccessToken,
}

impl SessionFacade {
    pub fn new(
        auth: Arc<dyn AuthBackend>,
        gateway: Arc<dyn DataGateway>,
        notifier: Arc<dyn Notifier>,
        public_token: AccessToken,
    ) -> Self {
        Self {
            auth,
            gateway,
            notifier,
            public_token,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, BoardError> {
        let response = self
            .auth
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                warn!("login for {email} failed: {e}");
                BoardError::Auth(e.to_string())
            })?;
        let session = self.open_session(response).await?;
        info!("user {} logged in", session.user.id);
        Ok(session)
    }

    /// Register an account and send a welcome email. The email is best
    /// effort: its failure is reported in the outcome, not raised.
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<SignupOutcome, BoardError> {
        if name.trim().is_empty() {
            return Err(BoardError::Validation("name is required".into()));
        }
        let response = self
            .auth
            .sign_up(email, password, &json!({ "name": name }))
            .await
            .map_err(|e| {
                warn!("signup for {email} failed: {e}");
                BoardError::Auth(e.to_string())
            })?;

        let user = user_from_auth(&response.user);
        let session = match response.tokens {
            Some(_) => Some(self.open_session(response).await?),
            None => {
                info!("signup for {email} awaits email confirmation");
                None
            }
        };

        let token = session
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.public_token.clone());
        let welcome = self.notifier.send_welcome_email(&token, &user).await;
        if let Some(err) = &welcome.error {
            warn!("welcome email for {email} not sent: {err}");
        }

        Ok(SignupOutcome {
            user: session.as_ref().map(|s| s.user.clone()).unwrap_or(user),
            session,
            welcome,
        })
    }

    /// End the session owning `token`.
    pub async fn logout(&self, token: &AccessToken) -> Result<(), BoardError> {
        self.auth
            .sign_out(token)
            .await
            .map_err(|e| BoardError::Auth(e.to_string()))?;
        info!("session logged out");
        Ok(())
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BoardError> {
        let response = self
            .auth
            .refresh(refresh_token)
            .await
            .map_err(|e| BoardError::Auth(e.to_string()))?;
        self.open_session(response).await
    }

    /// The user behind an access token, with profile fields filled in.
    pub async fn current_user(&self, token: &AccessToken) -> Result<User, BoardError> {
        let auth_user = self
            .auth
            .get_user(token)
            .await
            .map_err(|e| BoardError::Auth(e.to_string()))?;
        Ok(self.resolve_user(token, &auth_user).await)
    }

    async fn open_session(&self, response: AuthResponse) -> Result<Session, BoardError> {
        let tokens = response
            .tokens
            .ok_or_else(|| BoardError::Auth("email not confirmed".into()))?;
        let expires_at = Duration::try_seconds(tokens.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                BoardError::Auth(format!("session lifetime out of range: {}s", tokens.expires_in))
            })?;
        let access_token = AccessToken::new(tokens.access_token);
        let user = self.resolve_user(&access_token, &response.user).await;
        Ok(Session {
            user,
            access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
        })
    }

    /// Prefer the `profiles` row; fall back to the auth user's metadata.
    async fn resolve_user(&self, token: &AccessToken, auth_user: &AuthUser) -> User {
        let query = Query::rows(Collection::Profiles)
            .select(&["id", "email", "name", "role"])
            .filter(Filter::eq("id", auth_user.id.as_str()))
            .limit(1);
        let profile = match self.gateway.query(token, &query).await {
            Ok(result) => result
                .into_rows()
                .ok()
                .and_then(|rows| rows.into_iter().next())
                .and_then(|row| decode_row::<User>(with_email(row, auth_user)).ok()),
            Err(e) => {
                debug!("profile for {} unavailable: {e}", auth_user.id);
                None
            }
        };
        profile.unwrap_or_else(|| user_from_auth(auth_user))
    }
}

fn with_email(mut row: Value, auth_user: &AuthUser) -> Value {
    let missing = row.get("email").map_or(true, Value::is_null);
    if missing {
        if let Some(fields) = row.as_object_mut() {
            fields.insert(
                "email".into(),
                json!(auth_user.email.clone().unwrap_or_default()),
            );
        }
    }
    row
}

fn user_from_auth(auth_user: &AuthUser) -> User {
    let meta = &auth_user.user_metadata;
    User {
        id: auth_user.id.clone(),
        email: auth_user.email.clone().unwrap_or_default(),
        name: meta
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        role: meta
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::from_str)
            .unwrap_or_default(),
    }
}
