/// CLI login
///
/// The CLI opens `/cli/auth` in a browser. The emailed link lands on
/// `/cli/auth/verify`, which opens a session and forwards to
/// `/cli/auth/complete`, where a fresh API key is shown once.
use crate::{
    api::{
        login::{LoginForm, TokenQuery},
        pages::{cli_page, CliPage},
    },
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

/// Routes that don't send mail; `/cli/auth` is mounted behind the
/// submission throttle
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/cli/auth/verify", get(verify))
        .route("/cli/auth/complete", get(complete))
}

/// Whether offering passkey login makes sense
async fn has_passkeys(ctx: &AppContext) -> bool {
    ctx.passkeys.any_registered().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not check for registered passkeys");
        false
    })
}

/// GET /cli/auth
pub async fn page(State(ctx): State<AppContext>) -> Html<String> {
    cli_page(CliPage {
        has_passkeys: has_passkeys(&ctx).await,
        ..Default::default()
    })
}

/// POST /cli/auth
pub async fn submit(State(ctx): State<AppContext>, Form(form): Form<LoginForm>) -> AuthResult<Html<String>> {
    let has_passkeys = has_passkeys(&ctx).await;

    match ctx.issuer.request_magic_link(&form.email, LinkKind::Cli).await {
        Ok(message) => Ok(cli_page(CliPage {
            message: Some(message),
            has_passkeys,
            ..Default::default()
        })),
        Err(AuthError::Validation(error)) => Ok(cli_page(CliPage {
            error: Some(&error),
            has_passkeys,
            ..Default::default()
        })),
        Err(e) => Err(e),
    }
}

/// GET /cli/auth/verify?token=
async fn verify(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Query(query): Query<TokenQuery>,
) -> AuthResult<Response> {
    let has_passkeys = has_passkeys(&ctx).await;

    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Ok(cli_page(CliPage {
            error: Some("Invalid login link"),
            has_passkeys,
            ..Default::default()
        })
        .into_response());
    };

    match ctx.issuer.redeem_magic_link(&token).await {
        Ok((_, cookie)) => Ok((jar.add(cookie), Redirect::to("/cli/auth/complete")).into_response()),
        Err(AuthError::InvalidCredential) => Ok(cli_page(CliPage {
            error: Some("Invalid or expired login link. Please try again."),
            has_passkeys,
            ..Default::default()
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

/// GET /cli/auth/complete
async fn complete(State(ctx): State<AppContext>, jar: CookieJar) -> AuthResult<Response> {
    let email = match ctx.sessions.validate(&jar).await {
        Ok(email) => email,
        Err(AuthError::Unauthorized) => return Ok(Redirect::to("/cli/auth").into_response()),
        Err(e) => return Err(e),
    };

    let raw_key = ctx.issuer.mint_cli_key(&email).await?;
    tracing::info!(email = %email, "Issued CLI API key");

    Ok(cli_page(CliPage {
        api_key: Some(&raw_key),
        ..Default::default()
    })
    .into_response())
}
