//! Authentication seam.
//!
//! The gateway only needs to turn a bearer credential into a user id; how
//! the credential is validated is up to the implementation.

use async_trait::async_trait;
use ripple_protocol::UserId;
use std::collections::HashMap;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("Missing credential")]
    MissingCredential,

    /// The credential is malformed, expired or has a bad signature.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// The credential is valid but names no known user.
    #[error("Unknown user")]
    UnknownUser,

    /// The user directory could not be reached.
    #[error("Authentication backend unavailable: {0}")]
    Backend(String),
}

/// Resolves a bearer credential to the user it belongs to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve `credential` to a user id.
    async fn resolve_user(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// Fixed credential table, for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticAuthenticator {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user_id`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn resolve_user(&self, credential: &str) -> Result<UserId, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        self.tokens
            .get(credential)
            .cloned()
            .ok_or_else(|| AuthError::InvalidCredential("unknown token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_authenticator() {
        let u1 = UserId::parse("u1").unwrap();
        let auth = StaticAuthenticator::new().with_token("secret", u1.clone());

        assert_eq!(auth.resolve_user("secret").await.unwrap(), u1);
        assert!(matches!(
            auth.resolve_user("").await,
            Err(AuthError::MissingCredential)
        ));
        assert!(matches!(
            auth.resolve_user("forged").await,
            Err(AuthError::InvalidCredential(_))
        ));
    }
}
