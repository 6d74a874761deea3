//! Identity session: a thin wrapper over the external identity provider.
//! Register/login/logout are commands sent to the provider; the resulting
//! state change arrives later on the provider's event channel, the same
//! channel that delivers the startup resolution. Consumers therefore treat
//! session state as eventually consistent with the command just issued.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

const DEFAULT_IDENTITY_BASE: &str = "https://identitytoolkit.googleapis.com/v1";

/// Exactly one of these holds at any time. `Unresolved` means the provider
/// has not yet reported; it must not be rendered as "logged out".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Unresolved,
    Anonymous,
    Authenticated {
        user_id: String,
        display_name: Option<String>,
        email: Option<String>,
    },
}

impl SessionState {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, SessionState::Unresolved)
    }
}

/// Provider rejection of a register/login command. Carries the provider's
/// own code; a failed command never changes the current session state.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: String,
    pub message: String,
}

impl AuthError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<(), AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError>;

    /// Idempotent; always ends in `Anonymous`.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// The session event channel: delivers the startup resolution and every
    /// later session change, at least once each.
    fn sessions(&self) -> watch::Receiver<SessionState>;
}

/// Password-auth REST provider (Google Identity Toolkit wire format).
pub struct RestIdentityProvider {
    client: Client,
    base: String,
    api_key: String,
    events: watch::Sender<SessionState>,
}

impl RestIdentityProvider {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("IDENTITY_API_KEY").context("IDENTITY_API_KEY not set")?;
        let base =
            env::var("IDENTITY_BASE").unwrap_or_else(|_| DEFAULT_IDENTITY_BASE.to_string());
        let (events, _) = watch::channel(SessionState::Unresolved);
        Ok(Self {
            client: Client::new(),
            base,
            api_key,
            events,
        })
    }

    /// The server keeps no persisted session of its own, so startup
    /// resolution always lands on `Anonymous`. Called once after wiring so
    /// that subscribers observe `Unresolved` first.
    pub fn resolve_startup(&self) {
        if self.events.borrow().is_unresolved() {
            info!("Identity provider resolved: no persisted session");
            self.events.send_replace(SessionState::Anonymous);
        }
    }

    async fn post_auth(&self, path: &str, body: serde_json::Value) -> Result<AuthReply, AuthError> {
        let url = format!("{}/{}?key={}", self.base, path, self.api_key);
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::new("NETWORK_ERROR", e.to_string()))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| AuthError::new("NETWORK_ERROR", e.to_string()))?;
        if !status.is_success() {
            return Err(parse_provider_error(&text));
        }
        serde_json::from_str(&text).map_err(|e| AuthError::new("BAD_RESPONSE", e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<(), AuthError> {
        let reply = self
            .post_auth(
                "accounts:signUp",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        // The display name is applied after account creation, mirroring the
        // two-step register flow of the provider.
        let mut applied_name = None;
        if let Some(name) = display_name {
            self.post_auth(
                "accounts:update",
                serde_json::json!({
                    "idToken": reply.id_token,
                    "displayName": name,
                    "returnSecureToken": false,
                }),
            )
            .await?;
            applied_name = Some(name.to_string());
        }

        info!("Registered account for {}", email);
        self.events.send_replace(SessionState::Authenticated {
            user_id: reply.local_id,
            display_name: applied_name,
            email: reply.email.or_else(|| Some(email.to_string())),
        });
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let reply = self
            .post_auth(
                "accounts:signInWithPassword",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        info!("Signed in {}", email);
        self.events.send_replace(SessionState::Authenticated {
            user_id: reply.local_id,
            display_name: reply.display_name,
            email: reply.email.or_else(|| Some(email.to_string())),
        });
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.events.send_replace(SessionState::Anonymous);
        Ok(())
    }

    fn sessions(&self) -> watch::Receiver<SessionState> {
        self.events.subscribe()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthReply {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

fn parse_provider_error(body: &str) -> AuthError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => {
            let code = parsed.error.message;
            let message = match code.split(':').next().unwrap_or(&code).trim() {
                "EMAIL_EXISTS" => "El correo ya está registrado",
                "EMAIL_NOT_FOUND" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_PASSWORD" => {
                    "Credenciales no válidas"
                }
                "INVALID_EMAIL" => "El correo no es válido",
                "WEAK_PASSWORD" => "La contraseña es demasiado débil",
                _ => "Error de autenticación",
            };
            AuthError::new(code, message)
        }
        Err(_) => AuthError::new("UNKNOWN", "Error de autenticación"),
    }
}
