//! Password and one-time-code authentication against `/auth/v1`.
//!
//! The current session lives in a `tokio::sync::watch` channel so any number
//! of observers can follow sign-in and sign-out. Sessions are persisted as JSON
//! in the key-value store so a later process can restore them.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::client::{RestBackend, SESSION_KEY};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_unix)
    }
}

/// Result of a sign-up. `session` is `None` while email confirmation is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpKind {
    Signup,
    Recovery,
    Magiclink,
    Email,
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BackendError::Api`] for rejected credentials.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError::Api`] if the backend refuses the registration.
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, BackendError>;

    /// Ends the session remotely and locally. Signing out while signed out is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::KeyValue`] if the persisted session cannot be
    /// removed.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError::Api`] for an invalid or expired code.
    async fn verify_otp(
        &self,
        email: &str,
        token: &str,
        kind: OtpKind,
    ) -> Result<Session, BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError`] on transport or status failure.
    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError::Unauthenticated`] without a session.
    async fn update_password(&self, new_password: &str) -> Result<AuthUser, BackendError>;

    fn session(&self) -> Option<Session>;

    /// Loads a persisted session, discarding it once expired.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the key-value store cannot be read or the
    /// stored value is corrupt.
    fn restore_session(&self) -> Result<Option<Session>, BackendError>;

    fn on_auth_state_change(&self) -> watch::Receiver<Option<Session>>;
}

impl RestBackend {
    fn store_session(&self, session: Option<Session>) -> Result<(), BackendError> {
        match &session {
            Some(s) => {
                let json = serde_json::to_string(s)
                    .map_err(|e| BackendError::deserialize("serialize session", e))?;
                self.kv.set_item(SESSION_KEY, &json)?;
                tracing::info!(user_id = %s.user.id, "session stored");
            }
            None => {
                self.kv.remove_item(SESSION_KEY)?;
                tracing::info!("session cleared");
            }
        }
        self.session.send_replace(session);
        Ok(())
    }

    async fn post_auth(
        &self,
        path: &str,
        body: &Value,
        operation: &str,
    ) -> Result<Value, BackendError> {
        let request = self
            .request(Method::POST, self.endpoint(&format!("auth/v1/{path}"))?)
            .json(body);
        let response = self.send(request, operation).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| BackendError::deserialize(operation, e))
    }

    fn begin_session(&self, body: Value, operation: &str) -> Result<Session, BackendError> {
        let session: Session =
            serde_json::from_value(body).map_err(|e| BackendError::deserialize(operation, e))?;
        self.store_session(Some(session.clone()))?;
        Ok(session)
    }
}

#[async_trait]
impl AuthClient for RestBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let body = self
            .post_auth(
                "token?grant_type=password",
                &json!({ "email": email, "password": password }),
                "sign in",
            )
            .await?;
        self.begin_session(body, "sign in")
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, BackendError> {
        let body = self
            .post_auth(
                "signup",
                &json!({ "email": email, "password": password }),
                "sign up",
            )
            .await?;

        if body.get("access_token").is_some() {
            let session = self.begin_session(body, "sign up")?;
            return Ok(SignUpOutcome {
                user: session.user.clone(),
                session: Some(session),
            });
        }

        // confirmation pending: the body is the bare user
        let user: AuthUser =
            serde_json::from_value(body).map_err(|e| BackendError::deserialize("sign up", e))?;
        Ok(SignUpOutcome { user, session: None })
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.session.borrow().is_none() {
            return self.store_session(None);
        }

        let remote = match self.endpoint("auth/v1/logout") {
            Ok(url) => self.send(self.request(Method::POST, url), "sign out").await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(error) = remote {
            // the local session is cleared either way
            tracing::warn!(%error, "remote sign-out failed");
        }
        self.store_session(None)
    }

    async fn verify_otp(
        &self,
        email: &str,
        token: &str,
        kind: OtpKind,
    ) -> Result<Session, BackendError> {
        let body = self
            .post_auth(
                "verify",
                &json!({ "email": email, "token": token, "type": kind }),
                "verify otp",
            )
            .await?;
        self.begin_session(body, "verify otp")
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError> {
        self.post_auth("recover", &json!({ "email": email }), "password recovery")
            .await?;
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<AuthUser, BackendError> {
        if self.session.borrow().is_none() {
            return Err(BackendError::Unauthenticated);
        }
        let request = self
            .request(Method::PUT, self.endpoint("auth/v1/user")?)
            .json(&json!({ "password": new_password }));
        let response = self.send(request, "update password").await?;
        Self::read_json(response, "update password").await
    }

    fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    fn restore_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(json) = self.kv.get_item(SESSION_KEY)? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&json)
            .map_err(|e| BackendError::deserialize("restore session", e))?;

        if session.is_expired(chrono::Utc::now().timestamp()) {
            tracing::info!(user_id = %session.user.id, "persisted session expired");
            self.store_session(None)?;
            return Ok(None);
        }

        self.session.send_replace(Some(session.clone()));
        tracing::debug!(user_id = %session.user.id, "session restored");
        Ok(Some(session))
    }

    fn on_auth_state_change(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}
