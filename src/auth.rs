//! Bearer-token authentication for every API route.
//!
//! Tokens are held in an in-process registry seeded from configuration;
//! issuing and rotating tokens is out of scope here.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Authentication failure; all map to 401.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication token is required")]
    Missing,
    #[error("Invalid token")]
    Invalid,
    #[error("Token has expired")]
    Expired,
}

/// One API token record.
#[derive(Debug, Clone)]
pub struct ApiToken {
    pub id: Uuid,
    pub token: String,
    pub name: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiToken {
    /// An active, non-expiring token.
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: token.into(),
            name: name.into(),
            active: true,
            expires_at: None,
            last_used_at: None,
        }
    }
}

/// In-process registry of API tokens.
pub struct TokenRegistry {
    tokens: RwLock<Vec<ApiToken>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(Vec::new()),
        }
    }

    /// Seed from configured secrets, one active non-expiring token each.
    pub fn from_secrets(secrets: impl IntoIterator<Item = String>) -> Self {
        let tokens = secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| ApiToken::new(format!("config-{}", i + 1), secret))
            .collect();
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    pub async fn insert(&self, token: ApiToken) {
        self.tokens.write().await.push(token);
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }

    /// Look up a token by name (test and inspection hook).
    pub async fn find_by_name(&self, name: &str) -> Option<ApiToken> {
        self.tokens
            .read()
            .await
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Check a presented secret against the registry: it must match an
    /// active record that has not expired. A hit stamps `last_used_at`.
    pub async fn authenticate(&self, presented: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let mut tokens = self.tokens.write().await;
        let Some(record) = tokens
            .iter_mut()
            .find(|t| t.active && t.token == presented)
        else {
            return Err(AuthError::Invalid);
        };

        if let Some(expires_at) = record.expires_at {
            if now > expires_at {
                return Err(AuthError::Expired);
            }
        }

        record.last_used_at = Some(now);
        Ok(())
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware: every request must carry `Authorization: Bearer <token>`.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    let Some(presented) = bearer else {
        return Err(AuthError::Missing.into());
    };

    state.tokens.authenticate(presented, Utc::now()).await?;
    Ok(next.run(request).await)
}
