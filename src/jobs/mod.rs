use std::{future::Future, sync::Arc};
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::{error::AuthResult, metrics};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn cleanup tasks
        tokio::spawn(Self::login_token_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::session_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::in_memory_prune_job(Arc::clone(&self)));

        // Spawn monitoring tasks
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Sweep expired login tokens (runs every 15 minutes)
    async fn login_token_sweep_job(scheduler: Arc<Self>) {
        Self::run_sweep(900, "login_tokens", || tasks::sweep_login_tokens(&scheduler.context))
            .await
    }

    /// Sweep expired sessions (runs every hour)
    async fn session_sweep_job(scheduler: Arc<Self>) {
        Self::run_sweep(3600, "sessions", || tasks::sweep_sessions(&scheduler.context)).await
    }

    /// Prune limiter state and stale passkey ceremonies (runs every 5 minutes)
    async fn in_memory_prune_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            let sources = tasks::prune_failure_history(&scheduler.context);
            let ceremonies = tasks::prune_ceremonies(&scheduler.context).await;
            let throttled = tasks::prune_submission_quotas(&scheduler.context);
            if sources > 0 || ceremonies > 0 {
                info!(sources, ceremonies, throttled, "Pruned in-memory auth state");
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                metrics::record_background_failure("health_check");
                error!("Health check failed: {}", e);
            }
        }
    }

    async fn run_sweep<F, Fut>(period_secs: u64, job: &'static str, mut sweep: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AuthResult<u64>>,
    {
        let mut interval = interval(Duration::from_secs(period_secs));

        loop {
            interval.tick().await;

            match sweep().await {
                Ok(0) => {}
                Ok(count) => info!(job, count, "Swept expired rows"),
                Err(e) => {
                    metrics::record_background_failure(job);
                    error!(job, "Sweep failed: {}", e);
                }
            }
        }
    }
}
