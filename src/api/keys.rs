/// API key management (session only)
use crate::{
    auth::Identity,
    context::AppContext,
    db::models::ApiKey,
    error::AuthResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/keys", get(list_keys).post(create_key))
        .route("/api/keys/:id", delete(delete_key))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateKeyRequest {
    pub name: Option<String>,
}

/// A new key, including the raw value this one time
#[derive(Debug, Serialize)]
pub struct CreatedKey {
    pub key: String,
    #[serde(flatten)]
    pub record: ApiKey,
}

async fn list_keys(
    State(ctx): State<AppContext>,
    identity: Identity,
) -> AuthResult<Json<Vec<ApiKey>>> {
    Ok(Json(ctx.api_keys.list(&identity.email).await?))
}

async fn create_key(
    State(ctx): State<AppContext>,
    identity: Identity,
    body: Option<Json<CreateKeyRequest>>,
) -> AuthResult<(StatusCode, Json<CreatedKey>)> {
    let name = body
        .and_then(|Json(req)| req.name)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "API Key".to_string());

    let (key, record) = ctx.api_keys.create(&name, &identity.email).await?;
    Ok((StatusCode::CREATED, Json(CreatedKey { key, record })))
}

async fn delete_key(
    State(ctx): State<AppContext>,
    identity: Identity,
    Path(id): Path<i64>,
) -> AuthResult<StatusCode> {
    ctx.api_keys.delete(id, &identity.email).await?;
    Ok(StatusCode::NO_CONTENT)
}
