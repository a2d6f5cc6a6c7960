/// Magic link token store
use super::generate_secret;
use crate::error::{AuthError, AuthResult};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

/// Magic link tokens stop working after this long
pub const TOKEN_TTL_MINUTES: i64 = 15;

/// Single-use, time-boxed proofs of address ownership
#[derive(Clone)]
pub struct TokenStore {
    db: SqlitePool,
}

impl TokenStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Issue a new token bound to `email`
    ///
    /// Returns the raw token; it is what goes into the magic link.
    pub async fn issue(&self, email: &str) -> AuthResult<String> {
        let token = generate_secret();
        let expires_at = Utc::now() + Duration::minutes(TOKEN_TTL_MINUTES);

        sqlx::query("INSERT INTO auth_tokens (token, email, expires_at, used) VALUES (?1, ?2, ?3, 0)")
            .bind(&token)
            .bind(email)
            .bind(expires_at)
            .execute(&self.db)
            .await?;

        Ok(token)
    }

    /// Redeem a token and return the address it was issued for
    ///
    /// The check and the mark-used happen in one conditional UPDATE, so two
    /// concurrent redemptions of the same token cannot both succeed. Unknown,
    /// used and expired tokens all fail with the same `InvalidCredential`.
    pub async fn redeem(&self, token: &str) -> AuthResult<String> {
        let email: Option<String> = sqlx::query_scalar(
            "UPDATE auth_tokens SET used = 1
             WHERE token = ?1 AND used = 0 AND expires_at > ?2
             RETURNING email",
        )
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await?;

        email.ok_or(AuthError::InvalidCredential)
    }

    /// Delete every token past its expiry, used or not
    ///
    /// Returns the number of rows removed.
    pub async fn sweep(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
