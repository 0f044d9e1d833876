//! Username to user id resolution.

use crate::StoreError;
use ripple_protocol::UserId;
use sqlx::PgPool;
use tracing::warn;

/// Looks up account ids in the `users` table.
#[derive(Clone)]
pub struct PgUserLookup {
    pool: PgPool,
}

impl PgUserLookup {
    /// Create a lookup over a query pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve `username` to the id of its account, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn user_id_for(&self, username: &str) -> Result<Option<UserId>, StoreError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id::text FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        Ok(id.and_then(|id| match UserId::parse(id) {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                warn!(error = %e, "Stored user id is not a valid identity");
                None
            }
        }))
    }
}
