//! Bearer token validation.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use ripple_core::{AuthError, Authenticator};
use ripple_protocol::UserId;
use ripple_store::PgUserLookup;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error};

/// Invalid authenticator settings.
#[derive(Debug, Error)]
pub enum AuthSetupError {
    /// No signing secret configured.
    #[error("Token secret is empty; set auth.secret or SECRET_KEY")]
    EmptySecret,

    /// Unknown or non-HMAC algorithm.
    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
}

enum SubjectResolver {
    Subject,
    Database(PgUserLookup),
}

/// Validates HMAC-signed JWTs and maps their subject to a user.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
    resolver: SubjectResolver,
}

impl JwtAuthenticator {
    /// Create an authenticator that takes the `sub` claim as the user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is empty or the algorithm is not an
    /// HMAC algorithm.
    pub fn new(secret: &str, algorithm: &str) -> Result<Self, AuthSetupError> {
        if secret.is_empty() {
            return Err(AuthSetupError::EmptySecret);
        }
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| AuthSetupError::UnsupportedAlgorithm(algorithm.to_string()))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthSetupError::UnsupportedAlgorithm(format!("{:?}", algorithm)));
        }

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(algorithm),
            resolver: SubjectResolver::Subject,
        })
    }

    /// Treat the `sub` claim as a username and resolve it through `lookup`.
    #[must_use]
    pub fn with_user_lookup(mut self, lookup: PgUserLookup) -> Self {
        self.resolver = SubjectResolver::Database(lookup);
        self
    }

    fn subject(&self, credential: &str) -> Result<String, AuthError> {
        let token = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;
        token
            .claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| AuthError::InvalidCredential("missing subject".into()))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn resolve_user(&self, credential: &str) -> Result<UserId, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let subject = self.subject(credential)?;

        match &self.resolver {
            SubjectResolver::Subject => UserId::parse(subject)
                .map_err(|e| AuthError::InvalidCredential(e.to_string())),
            SubjectResolver::Database(lookup) => match lookup.user_id_for(&subject).await {
                Ok(Some(user_id)) => Ok(user_id),
                Ok(None) => {
                    debug!("Token subject has no account");
                    Err(AuthError::UnknownUser)
                }
                Err(e) => {
                    error!(error = %e, "User lookup failed");
                    Err(AuthError::Backend(e.to_string()))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        exp: u64,
    }

    fn token(secret: &str, sub: &str, exp: u64) -> String {
        encode(
            &Header::default(),
            &TestClaims { sub, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid(sub: &str) -> String {
        token(SECRET, sub, get_current_timestamp() + 3600)
    }

    #[tokio::test]
    async fn test_valid_token_resolves_subject() {
        let auth = JwtAuthenticator::new(SECRET, "HS256").unwrap();
        let user = auth.resolve_user(&valid("u1")).await.unwrap();
        assert_eq!(user.as_str(), "u1");
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let auth = JwtAuthenticator::new(SECRET, "HS256").unwrap();
        let forged = token("other-secret", "u1", get_current_timestamp() + 3600);
        assert!(matches!(
            auth.resolve_user(&forged).await,
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_expired_token() {
        let auth = JwtAuthenticator::new(SECRET, "HS256").unwrap();
        let expired = token(SECRET, "u1", get_current_timestamp() - 3600);
        assert!(matches!(
            auth.resolve_user(&expired).await,
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_garbage_and_empty() {
        let auth = JwtAuthenticator::new(SECRET, "HS256").unwrap();
        assert!(matches!(
            auth.resolve_user("not-a-jwt").await,
            Err(AuthError::InvalidCredential(_))
        ));
        assert!(matches!(
            auth.resolve_user("").await,
            Err(AuthError::MissingCredential)
        ));
    }

    #[test]
    fn test_setup_errors() {
        assert!(matches!(
            JwtAuthenticator::new("", "HS256"),
            Err(AuthSetupError::EmptySecret)
        ));
        assert!(matches!(
            JwtAuthenticator::new(SECRET, "RS256"),
            Err(AuthSetupError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            JwtAuthenticator::new(SECRET, "XYZ"),
            Err(AuthSetupError::UnsupportedAlgorithm(_))
        ));
    }
}
