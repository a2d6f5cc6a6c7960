/// Credential database models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Browser session record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Stored API key (never carries the raw key)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    #[sqlx(rename = "email")]
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Registered passkey metadata; the credential itself stays in `credential_json`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PasskeyRecord {
    pub id: String,
    #[sqlx(rename = "email")]
    pub owner_email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Authorized user directory entry
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AuthorizedUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
