/// Caller identity for API clients
use crate::{
    auth::{Identity, Scheme},
    context::AppContext,
};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/me", get(me))
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub email: String,
    pub admin: bool,
    /// "session" or "bearer"
    pub scheme: &'static str,
}

async fn me(State(ctx): State<AppContext>, identity: Identity) -> Json<WhoAmI> {
    Json(WhoAmI {
        admin: ctx.users.is_admin(&identity.email),
        scheme: match identity.via {
            Scheme::Session => "session",
            Scheme::BearerKey => "bearer",
        },
        email: identity.email,
    })
}
