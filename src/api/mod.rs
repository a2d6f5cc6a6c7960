/// HTTP routes and handlers
pub mod cli_auth;
pub mod health;
pub mod keys;
pub mod login;
pub mod me;
pub mod middleware;
pub mod pages;
pub mod passkeys;
pub mod users;

use crate::{context::AppContext, rate_limit::submission_throttle_middleware};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

/// Build all routes
pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    // Endpoints that send login mail share one quota
    let submissions = Router::new()
        .route("/auth/login", post(login::submit))
        .route("/cli/auth", get(cli_auth::page).post(cli_auth::submit))
        .route_layer(from_fn_with_state(ctx.clone(), submission_throttle_middleware));

    Router::new()
        .merge(health::routes())
        .merge(pages::routes())
        .merge(login::routes())
        .merge(cli_auth::routes())
        .merge(submissions)
        .merge(passkeys::routes())
        .merge(keys::routes())
        .merge(users::routes())
        .merge(me::routes())
}
