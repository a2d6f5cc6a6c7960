/// Browser session store
use super::generate_secret;
use crate::{
    db::models::Session,
    error::{AuthError, AuthResult},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

/// Sessions last thirty days
pub const SESSION_TTL_DAYS: i64 = 30;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "dk_session";

/// Long-lived browser sessions carried in an HTTP-only cookie
#[derive(Clone)]
pub struct SessionStore {
    db: SqlitePool,
    secure_cookies: bool,
}

impl SessionStore {
    /// Create a session store; `secure_cookies` adds the Secure attribute
    pub fn new(db: SqlitePool, secure_cookies: bool) -> Self {
        Self { db, secure_cookies }
    }

    /// Start a session for `email` and return the cookie that carries it
    pub async fn create(&self, email: &str) -> AuthResult<Cookie<'static>> {
        let id = generate_secret();
        let expires_at = Utc::now() + Duration::days(SESSION_TTL_DAYS);

        sqlx::query("INSERT INTO sessions (id, email, expires_at) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(email)
            .bind(expires_at)
            .execute(&self.db)
            .await?;

        tracing::debug!(email = %email, "Created session");

        self.session_cookie(id, expires_at)
    }

    /// Resolve the session cookie in `jar` to the address it belongs to
    ///
    /// Fails with `Unauthorized` when there is no cookie, no such session, or
    /// the session has expired. Expired rows are deleted on the way out.
    pub async fn validate(&self, jar: &CookieJar) -> AuthResult<String> {
        let id = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(AuthError::Unauthorized)?;

        self.validate_id(&id).await
    }

    /// Resolve a raw session id
    pub async fn validate_id(&self, id: &str) -> AuthResult<String> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT id, email, expires_at FROM sessions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AuthError::Unauthorized)?;

        // Check expiration
        if Utc::now() >= session.expires_at {
            sqlx::query("DELETE FROM sessions WHERE id = ?1")
                .bind(&session.id)
                .execute(&self.db)
                .await?;
            tracing::debug!("Removed expired session");
            return Err(AuthError::Unauthorized);
        }

        Ok(session.email)
    }

    /// End the session in `jar`, if any, and clear the cookie
    ///
    /// Logging out without a session is not an error.
    pub async fn destroy(&self, jar: CookieJar) -> AuthResult<CookieJar> {
        let Some(id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
            return Ok(jar);
        };

        sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(&id)
            .execute(&self.db)
            .await?;

        Ok(jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build()))
    }

    /// Delete every expired session
    pub async fn sweep(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    fn session_cookie(&self, id: String, expires_at: DateTime<Utc>) -> AuthResult<Cookie<'static>> {
        let expires = time::OffsetDateTime::from_unix_timestamp(expires_at.timestamp())
            .map_err(|e| AuthError::Internal(format!("Invalid session expiry: {}", e)))?;

        Ok(Cookie::build((SESSION_COOKIE, id))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .expires(expires)
            .build())
    }
}
