/// Passkey registration, login and management endpoints
use crate::{
    auth::Identity,
    context::AppContext,
    db::models::PasskeyRecord,
    error::AuthResult,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use webauthn_rs::prelude::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse,
};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/passkey/register/begin", post(register_begin))
        .route("/passkey/register/finish", post(register_finish))
        .route("/passkey/login/begin", post(login_begin))
        .route("/passkey/login/finish", post(login_finish))
        .route("/passkey/credentials", get(list_credentials))
        .route("/passkey/credentials/:id", delete(delete_credential))
}

#[derive(Debug, Deserialize)]
struct RegisterQuery {
    name: Option<String>,
}

async fn register_begin(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> AuthResult<Json<CreationChallengeResponse>> {
    Ok(Json(ctx.ceremonies.begin_registration(&identity.email).await?))
}

async fn register_finish(
    State(ctx): State<AppContext>,
    identity: Identity,
    Query(query): Query<RegisterQuery>,
    Json(response): Json<RegisterPublicKeyCredential>,
) -> AuthResult<(StatusCode, Json<PasskeyRecord>)> {
    let name = query
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Passkey".to_string());

    let record = ctx
        .ceremonies
        .finish_registration(&identity.email, &response, &name)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn login_begin(State(ctx): State<AppContext>) -> AuthResult<Json<RequestChallengeResponse>> {
    Ok(Json(ctx.ceremonies.begin_login().await?))
}

/// Verify the assertion and open a session for whoever it resolves to
async fn login_finish(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Json(credential): Json<PublicKeyCredential>,
) -> AuthResult<(CookieJar, Json<serde_json::Value>)> {
    let email = ctx.ceremonies.finish_login(&credential).await?;
    let cookie = ctx.sessions.create(&email).await?;

    Ok((jar.add(cookie), Json(json!({ "email": email }))))
}

async fn list_credentials(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> AuthResult<Json<Vec<PasskeyRecord>>> {
    Ok(Json(ctx.passkeys.list(&identity.email).await?))
}

async fn delete_credential(
    State(ctx): State<AppContext>,
    identity: Identity,
    Path(id): Path<String>,
) -> AuthResult<StatusCode> {
    ctx.passkeys.delete(&id, &identity.email).await?;
    Ok(StatusCode::NO_CONTENT)
}
