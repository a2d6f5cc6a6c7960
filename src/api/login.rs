/// Browser magic-link login
use crate::{
    api::pages::login_page,
    context::AppContext,
    error::{AuthError, AuthResult},
    mailer::LinkKind,
};
use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

/// Routes that don't send mail; `POST /auth/login` is mounted behind the
/// submission throttle instead
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/login", get(show_login))
        .route("/auth/verify", get(verify))
        .route("/auth/logout", get(logout).post(logout))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

async fn show_login() -> Html<String> {
    login_page(None, None)
}

/// POST /auth/login
pub async fn submit(State(ctx): State<AppContext>, Form(form): Form<LoginForm>) -> AuthResult<Html<String>> {
    match ctx
        .issuer
        .request_magic_link(&form.email, LinkKind::Browser)
        .await
    {
        Ok(message) => Ok(login_page(Some(message), None)),
        Err(AuthError::Validation(error)) => Ok(login_page(None, Some(&error))),
        Err(e) => Err(e),
    }
}

/// GET /auth/verify?token=
async fn verify(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Query(query): Query<TokenQuery>,
) -> AuthResult<Response> {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Ok(login_page(None, Some("Invalid login link")).into_response());
    };

    match ctx.issuer.redeem_magic_link(&token).await {
        Ok((_, cookie)) => Ok((jar.add(cookie), Redirect::to("/")).into_response()),
        Err(AuthError::InvalidCredential) => Ok(login_page(
            None,
            Some("Invalid or expired login link. Please request a new one."),
        )
        .into_response()),
        Err(e) => Err(e),
    }
}

/// GET|POST /auth/logout
async fn logout(State(ctx): State<AppContext>, jar: CookieJar) -> Response {
    match ctx.sessions.destroy(jar.clone()).await {
        Ok(jar) => (jar, Redirect::to("/login")).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to destroy session");
            Redirect::to("/login").into_response()
        }
    }
}
