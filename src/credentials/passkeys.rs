/// Passkey credential store
use crate::db::models::PasskeyRecord;
use crate::error::{AuthError, AuthResult};
use chrono::Utc;
use sqlx::SqlitePool;
use webauthn_rs::prelude::Passkey;

/// Registered WebAuthn credentials, scoped to their owner
#[derive(Clone)]
pub struct PasskeyStore {
    db: SqlitePool,
}

impl PasskeyStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a freshly registered credential for `owner`
    ///
    /// The row id is the hex encoded credential id.
    pub async fn save(&self, owner: &str, name: &str, passkey: &Passkey) -> AuthResult<PasskeyRecord> {
        let id = hex::encode(passkey.cred_id());
        let credential_json = serde_json::to_string(passkey)
            .map_err(|e| AuthError::Internal(format!("Failed to serialize passkey: {}", e)))?;

        self.insert(&id, owner, name, &credential_json).await
    }

    async fn insert(
        &self,
        id: &str,
        owner: &str,
        name: &str,
        credential_json: &str,
    ) -> AuthResult<PasskeyRecord> {
        let record = sqlx::query_as::<_, PasskeyRecord>(
            "INSERT INTO passkey_credentials (id, email, name, credential_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, email, name, created_at",
        )
        .bind(id)
        .bind(owner)
        .bind(name)
        .bind(credential_json)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AuthError::Conflict("Passkey already registered".to_string())
            }
            other => AuthError::Database(other),
        })?;

        tracing::info!(owner = %owner, name = %name, "Registered passkey");
        Ok(record)
    }

    /// Passkeys registered by `owner`, oldest first
    pub async fn list(&self, owner: &str) -> AuthResult<Vec<PasskeyRecord>> {
        let records = sqlx::query_as::<_, PasskeyRecord>(
            "SELECT id, email, name, created_at FROM passkey_credentials
             WHERE email = ?1 ORDER BY created_at, id",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }

    /// Whether any passkey at all has been registered
    pub async fn any_registered(&self) -> AuthResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passkey_credentials")
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Remove passkey `id`; another owner's passkey is `NotFound`
    pub async fn delete(&self, id: &str, owner: &str) -> AuthResult<()> {
        let result = sqlx::query("DELETE FROM passkey_credentials WHERE id = ?1 AND email = ?2")
            .bind(id)
            .bind(owner)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("Passkey not found".to_string()));
        }

        tracing::info!(owner = %owner, "Removed passkey");
        Ok(())
    }

    /// Store the updated counter and backup state of an existing credential
    pub async fn refresh(&self, passkey: &Passkey) -> AuthResult<()> {
        let id = hex::encode(passkey.cred_id());
        let credential_json = serde_json::to_string(passkey)
            .map_err(|e| AuthError::Internal(format!("Failed to serialize passkey: {}", e)))?;

        sqlx::query("UPDATE passkey_credentials SET credential_json = ?1 WHERE id = ?2")
            .bind(credential_json)
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Load `owner`'s credentials as WebAuthn passkeys
    ///
    /// Rows that no longer deserialize are skipped with a warning rather than
    /// locking the owner out of their other passkeys.
    pub async fn webauthn_credentials(&self, owner: &str) -> AuthResult<Vec<Passkey>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, credential_json FROM passkey_credentials WHERE email = ?1",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;

        let passkeys = rows
            .into_iter()
            .filter_map(|(id, json)| match serde_json::from_str::<Passkey>(&json) {
                Ok(passkey) => Some(passkey),
                Err(e) => {
                    tracing::warn!(credential_id = %id, error = %e, "Skipping unreadable passkey");
                    None
                }
            })
            .collect();

        Ok(passkeys)
    }
}
