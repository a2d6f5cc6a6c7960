/// Background task implementations
use crate::{context::AppContext, db, error::AuthResult, metrics};

/// Delete login tokens past their expiry
pub async fn sweep_login_tokens(ctx: &AppContext) -> AuthResult<u64> {
    let removed = ctx.tokens.sweep().await?;
    metrics::record_sweep("tokens", removed);
    Ok(removed)
}

/// Delete sessions past their expiry
pub async fn sweep_sessions(ctx: &AppContext) -> AuthResult<u64> {
    let removed = ctx.sessions.sweep().await?;
    metrics::record_sweep("sessions", removed);
    Ok(removed)
}

/// Drop failure history for sources with nothing left in the window
pub fn prune_failure_history(ctx: &AppContext) -> u64 {
    let removed = ctx.failure_limiter.prune_idle() as u64;
    metrics::record_sweep("failure_sources", removed);
    removed
}

/// Forget submission quotas that have refilled; returns sources still tracked
pub fn prune_submission_quotas(ctx: &AppContext) -> usize {
    ctx.submission_throttle.prune()
}

/// Drop passkey ceremonies that were started but never finished
pub async fn prune_ceremonies(ctx: &AppContext) -> u64 {
    let removed = ctx.ceremonies.prune_expired().await as u64;
    metrics::record_sweep("ceremonies", removed);
    removed
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> AuthResult<()> {
    db::test_connection(&ctx.db).await
}
