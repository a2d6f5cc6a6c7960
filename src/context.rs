/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    credentials::{ApiKeyStore, PasskeyStore, SessionStore, TokenStore},
    db,
    directory::UserStore,
    error::{AuthError, AuthResult},
    issuance::Issuer,
    mailer::{MagicLinkSender, Mailer},
    rate_limit::{FailureLimiter, SubmissionThrottle},
    webauthn::PasskeyCeremonies,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    // Credential stores
    pub tokens: TokenStore,
    pub sessions: SessionStore,
    pub api_keys: ApiKeyStore,
    pub passkeys: PasskeyStore,
    pub users: UserStore,
    // Flows
    pub issuer: Issuer,
    pub ceremonies: Arc<PasskeyCeremonies>,
    // Abuse control, owned here so every request shares one instance
    pub failure_limiter: FailureLimiter,
    pub submission_throttle: SubmissionThrottle,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AuthResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let mailer = Mailer::new(
            config.email.clone(),
            &config.service.base_url,
            config.authentication.dev_mode,
        )?;
        if config.authentication.dev_mode {
            tracing::warn!("Dev mode: magic links are logged, cookies are not marked Secure");
        }

        Self::assemble(config, db, Arc::new(mailer))
    }

    /// Wire every component on top of an open, migrated pool
    pub fn assemble(
        config: ServerConfig,
        db: SqlitePool,
        sender: Arc<dyn MagicLinkSender>,
    ) -> AuthResult<Self> {
        let tokens = TokenStore::new(db.clone());
        let sessions = SessionStore::new(db.clone(), !config.authentication.dev_mode);
        let api_keys = ApiKeyStore::new(db.clone());
        let passkeys = PasskeyStore::new(db.clone());
        let users = UserStore::new(db.clone(), &config.authentication.admin_email);

        let issuer = Issuer::new(
            tokens.clone(),
            sessions.clone(),
            api_keys.clone(),
            users.clone(),
            sender,
        );
        let ceremonies = Arc::new(PasskeyCeremonies::new(
            &config.passkeys,
            passkeys.clone(),
            users.clone(),
        )?);

        let failure_limiter = FailureLimiter::from_config(&config.rate_limit);
        let submission_throttle =
            SubmissionThrottle::new(config.rate_limit.login_requests_per_minute);

        Ok(Self {
            config: Arc::new(config),
            db,
            tokens,
            sessions,
            api_keys,
            passkeys,
            users,
            issuer,
            ceremonies,
            failure_limiter,
            submission_throttle,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> AuthResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                AuthError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Context over a fresh temporary database, delivering mail to `sender`
    #[cfg(test)]
    pub async fn for_tests(sender: Arc<dyn MagicLinkSender>) -> (tempfile::TempDir, Self) {
        let (dir, pool) = db::test_pool().await;
        let config = ServerConfig::for_tests(dir.path());
        let ctx = Self::assemble(config, pool, sender).unwrap();
        (dir, ctx)
    }
}
