/// API key store
///
/// Raw keys are `dk_` followed by 64 hex characters. Only the SHA-256 hash
/// and an 8 character display prefix are ever written to the database.
use super::{generate_secret, sha256_hex};
use crate::db::models::ApiKey;
use crate::error::{AuthError, AuthResult};
use chrono::Utc;
use sqlx::SqlitePool;

/// Scheme tag at the front of every raw key
pub const API_KEY_PREFIX: &str = "dk_";

/// Characters of the raw key kept for display
const DISPLAY_PREFIX_LEN: usize = 8;

#[derive(Clone)]
pub struct ApiKeyStore {
    db: SqlitePool,
}

impl ApiKeyStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a key for `owner`
    ///
    /// Returns the raw key together with the stored record. The raw key is
    /// not recoverable afterwards.
    pub async fn create(&self, name: &str, owner: &str) -> AuthResult<(String, ApiKey)> {
        let raw_key = format!("{}{}", API_KEY_PREFIX, generate_secret());
        let key_prefix = raw_key[..DISPLAY_PREFIX_LEN].to_string();
        let key_hash = sha256_hex(&raw_key);

        let record = sqlx::query_as::<_, ApiKey>(
            "INSERT INTO api_keys (name, key_prefix, key_hash, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, name, key_prefix, key_hash, email, created_at, last_used_at",
        )
        .bind(name)
        .bind(&key_prefix)
        .bind(&key_hash)
        .bind(owner)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;

        tracing::info!(owner = %owner, key_id = record.id, prefix = %key_prefix, "Created API key");

        Ok((raw_key, record))
    }

    /// Resolve a raw key to its owner, touching `last_used_at`
    ///
    /// Returns `None` for anything that is not a live key.
    pub async fn validate(&self, raw_key: &str) -> AuthResult<Option<String>> {
        if !raw_key.starts_with(API_KEY_PREFIX) {
            return Ok(None);
        }

        let owner: Option<String> = sqlx::query_scalar(
            "UPDATE api_keys SET last_used_at = ?1 WHERE key_hash = ?2 RETURNING email",
        )
        .bind(Utc::now())
        .bind(sha256_hex(raw_key))
        .fetch_optional(&self.db)
        .await?;

        Ok(owner)
    }

    /// Keys owned by `owner`, newest first
    pub async fn list(&self, owner: &str) -> AuthResult<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT id, name, key_prefix, key_hash, email, created_at, last_used_at
             FROM api_keys WHERE email = ?1 ORDER BY created_at DESC, id DESC",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        Ok(keys)
    }

    /// Revoke key `id`
    ///
    /// A key that belongs to someone else is reported exactly like a key
    /// that does not exist.
    pub async fn delete(&self, id: i64, owner: &str) -> AuthResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?1 AND email = ?2")
            .bind(id)
            .bind(owner)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("API key not found".to_string()));
        }

        tracing::info!(owner = %owner, key_id = id, "Revoked API key");
        Ok(())
    }
}
