/// Authorized user directory
///
/// Decides who may authenticate at all and who is the administrator. The
/// administrator address comes from configuration and is never stored in
/// `authorized_users`; it is always authorized.
use crate::db::models::AuthorizedUser;
use crate::error::{AuthError, AuthResult};
use chrono::Utc;
use sqlx::SqlitePool;
use validator::ValidateEmail;

#[derive(Clone)]
pub struct UserStore {
    db: SqlitePool,
    admin_email: String,
}

impl UserStore {
    pub fn new(db: SqlitePool, admin_email: &str) -> Self {
        Self {
            db,
            admin_email: admin_email.trim().to_lowercase(),
        }
    }

    /// Whether `email` may log in (case-insensitive)
    pub async fn is_authorized(&self, email: &str) -> AuthResult<bool> {
        let email = normalize(email);
        if email == self.admin_email {
            return Ok(true);
        }

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM authorized_users WHERE LOWER(email) = ?1")
                .bind(&email)
                .fetch_one(&self.db)
                .await?;

        Ok(count > 0)
    }

    /// Whether `email` is the configured administrator (case-insensitive)
    pub fn is_admin(&self, email: &str) -> bool {
        normalize(email) == self.admin_email
    }

    /// Add an authorized user
    pub async fn add(&self, email: &str, name: &str) -> AuthResult<AuthorizedUser> {
        let email = validate_address(email)?;

        let user = sqlx::query_as::<_, AuthorizedUser>(
            "INSERT INTO authorized_users (email, name, created_at) VALUES (?1, ?2, ?3)
             RETURNING id, email, name, created_at",
        )
        .bind(&email)
        .bind(name.trim())
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(|e| duplicate_to_conflict(e, &email))?;

        tracing::info!(email = %email, user_id = user.id, "Authorized user added");
        Ok(user)
    }

    /// Change a user's address and display name
    pub async fn update(&self, id: i64, email: &str, name: &str) -> AuthResult<AuthorizedUser> {
        let email = validate_address(email)?;

        let user = sqlx::query_as::<_, AuthorizedUser>(
            "UPDATE authorized_users SET email = ?1, name = ?2 WHERE id = ?3
             RETURNING id, email, name, created_at",
        )
        .bind(&email)
        .bind(name.trim())
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| duplicate_to_conflict(e, &email))?
        .ok_or_else(|| AuthError::NotFound("User not found".to_string()))?;

        tracing::info!(email = %email, user_id = id, "Authorized user updated");
        Ok(user)
    }

    /// Remove an authorized user
    pub async fn delete(&self, id: i64) -> AuthResult<()> {
        let result = sqlx::query("DELETE FROM authorized_users WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("User not found".to_string()));
        }

        tracing::info!(user_id = id, "Authorized user removed");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> AuthResult<AuthorizedUser> {
        sqlx::query_as::<_, AuthorizedUser>(
            "SELECT id, email, name, created_at FROM authorized_users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AuthError::NotFound("User not found".to_string()))
    }

    /// All authorized users ordered by address
    pub async fn list(&self) -> AuthResult<Vec<AuthorizedUser>> {
        let users = sqlx::query_as::<_, AuthorizedUser>(
            "SELECT id, email, name, created_at FROM authorized_users ORDER BY email",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    /// The administrator followed by every authorized address, lower-cased
    pub async fn all_emails(&self) -> AuthResult<Vec<String>> {
        let stored: Vec<String> = sqlx::query_scalar("SELECT email FROM authorized_users")
            .fetch_all(&self.db)
            .await?;

        let mut emails = vec![self.admin_email.clone()];
        for email in stored {
            let email = email.to_lowercase();
            if !emails.contains(&email) {
                emails.push(email);
            }
        }

        Ok(emails)
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_address(email: &str) -> AuthResult<String> {
    let email = normalize(email);
    if email.is_empty() {
        return Err(AuthError::Validation("Email is required".to_string()));
    }
    if !email.validate_email() {
        return Err(AuthError::Validation("Invalid email address".to_string()));
    }
    Ok(email)
}

fn duplicate_to_conflict(e: sqlx::Error, email: &str) -> AuthError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AuthError::Conflict(format!("User already exists: {}", email))
        }
        other => AuthError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn directory() -> (tempfile::TempDir, UserStore) {
        let (dir, pool) = test_pool().await;
        (dir, UserStore::new(pool, "Admin@Example.com"))
    }

    #[tokio::test]
    async fn test_admin_is_always_authorized() {
        let (_dir, users) = directory().await;

        assert!(users.is_authorized("admin@example.com").await.unwrap());
        assert!(users.is_authorized("ADMIN@EXAMPLE.COM").await.unwrap());
        assert!(users.is_admin("admin@EXAMPLE.com"));
        assert!(users.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_address_is_not_authorized() {
        let (_dir, users) = directory().await;
        assert!(!users.is_authorized("alice@example.com").await.unwrap());
        assert!(!users.is_admin("alice@example.com"));
    }

    #[tokio::test]
    async fn test_added_user_is_authorized_case_insensitively() {
        let (_dir, users) = directory().await;

        let user = users.add("  Bob@Example.com ", "Bob").await.unwrap();
        assert_eq!(user.email, "bob@example.com");
        assert_eq!(user.name, "Bob");

        assert!(users.is_authorized("BOB@example.com").await.unwrap());
        assert!(!users.is_admin("bob@example.com"));
    }

    #[tokio::test]
    async fn test_duplicate_add_conflicts() {
        let (_dir, users) = directory().await;

        users.add("bob@example.com", "Bob").await.unwrap();
        match users.add("BOB@example.com", "Bobby").await {
            Err(AuthError::Conflict(_)) => {}
            other => panic!("Expected Conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_rejects_bad_addresses() {
        let (_dir, users) = directory().await;

        assert!(matches!(users.add("", "x").await, Err(AuthError::Validation(_))));
        assert!(matches!(
            users.add("not-an-address", "x").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (_dir, users) = directory().await;

        let bob = users.add("bob@example.com", "Bob").await.unwrap();
        let carol = users.add("carol@example.com", "Carol").await.unwrap();

        let renamed = users.update(bob.id, "robert@example.com", "Robert").await.unwrap();
        assert_eq!(renamed.email, "robert@example.com");
        assert!(!users.is_authorized("bob@example.com").await.unwrap());

        assert!(matches!(
            users.update(bob.id, "carol@example.com", "Dup").await,
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            users.update(9999, "x@example.com", "X").await,
            Err(AuthError::NotFound(_))
        ));

        users.delete(carol.id).await.unwrap();
        assert!(matches!(users.get(carol.id).await, Err(AuthError::NotFound(_))));
        assert!(matches!(users.delete(carol.id).await, Err(AuthError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_all_emails_starts_with_admin() {
        let (_dir, users) = directory().await;

        users.add("bob@example.com", "Bob").await.unwrap();
        users.add("carol@example.com", "Carol").await.unwrap();

        let emails = users.all_emails().await.unwrap();
        assert_eq!(emails[0], "admin@example.com");
        assert_eq!(emails.len(), 3);
        assert!(emails.contains(&"bob@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_all_emails_skips_stored_admin_duplicate() {
        let (_dir, users) = directory().await;

        users.add("admin@example.com", "Admin again").await.unwrap();
        let emails = users.all_emails().await.unwrap();
        assert_eq!(emails, vec!["admin@example.com".to_string()]);
    }
}
