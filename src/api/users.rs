/// Authorized user administration (admin session only)
use crate::{
    auth::AdminIdentity,
    context::AppContext,
    db::models::AuthorizedUser,
    error::AuthResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/users", get(list_users).post(add_user))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

async fn list_users(
    State(ctx): State<AppContext>,
    _admin: AdminIdentity,
) -> AuthResult<Json<Vec<AuthorizedUser>>> {
    Ok(Json(ctx.users.list().await?))
}

async fn get_user(
    State(ctx): State<AppContext>,
    _admin: AdminIdentity,
    Path(id): Path<i64>,
) -> AuthResult<Json<AuthorizedUser>> {
    Ok(Json(ctx.users.get(id).await?))
}

async fn add_user(
    State(ctx): State<AppContext>,
    admin: AdminIdentity,
    Json(req): Json<UserRequest>,
) -> AuthResult<(StatusCode, Json<AuthorizedUser>)> {
    let user = ctx.users.add(&req.email, &req.name).await?;
    tracing::info!(admin = %admin.email, email = %user.email, "Admin authorized a user");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(ctx): State<AppContext>,
    _admin: AdminIdentity,
    Path(id): Path<i64>,
    Json(req): Json<UserRequest>,
) -> AuthResult<Json<AuthorizedUser>> {
    Ok(Json(ctx.users.update(id, &req.email, &req.name).await?))
}

async fn delete_user(
    State(ctx): State<AppContext>,
    admin: AdminIdentity,
    Path(id): Path<i64>,
) -> AuthResult<StatusCode> {
    ctx.users.delete(id).await?;
    tracing::info!(admin = %admin.email, user_id = id, "Admin removed a user");
    Ok(StatusCode::NO_CONTENT)
}
