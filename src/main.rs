/// Doorkeeper - authentication gateway
///
/// Guards a web application and its API behind magic-link email login,
/// passkeys and bearer API keys, admitting only addresses on an
/// administrator-managed allow-list.

mod api;
mod auth;
mod config;
mod context;
mod credentials;
mod db;
mod directory;
mod error;
mod issuance;
mod jobs;
mod mailer;
mod metrics;
mod rate_limit;
mod server;
mod webauthn;

use config::ServerConfig;
use context::AppContext;
use error::AuthResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AuthResult<()> {
    // Load configuration (also reads .env, so it comes before logging)
    let config = ServerConfig::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| "doorkeeper=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Doorkeeper v{}", env!("CARGO_PKG_VERSION"));

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}
