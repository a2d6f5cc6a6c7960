/// Authentication and authorization middleware
///
/// Every request is classified by path and held to the matching scheme:
///
/// | class      | accepts                          | missing credential |
/// |------------|----------------------------------|--------------------|
/// | Public     | anything                         | -                  |
/// | Management | session cookie only              | 401                |
/// | Bearer     | `Authorization: Bearer`, session | 401                |
/// | Session    | session cookie                   | 303 to `/login`    |
use crate::{
    auth::{Identity, Scheme},
    context::AppContext,
    error::AuthError,
    metrics,
    rate_limit::source_address,
};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use std::time::Instant;

/// Paths that never require a credential
const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/health/ready",
    "/login",
    "/auth/login",
    "/auth/verify",
    "/auth/logout",
    "/passkey/login/begin",
    "/passkey/login/finish",
    "/cli/auth",
    "/cli/auth/verify",
    "/cli/auth/complete",
];

/// Credential administration; bearer keys must never reach these
const MANAGEMENT_PREFIXES: &[&str] = &["/api/keys", "/api/users"];

/// Which authentication scheme a path requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    Management,
    Bearer,
    Session,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::Public => "public",
            RouteClass::Management => "management",
            RouteClass::Bearer => "bearer",
            RouteClass::Session => "session",
        }
    }
}

/// Classify a request path
pub fn classify(path: &str) -> RouteClass {
    if PUBLIC_PATHS.contains(&path) || path.starts_with("/static/") {
        return RouteClass::Public;
    }

    if MANAGEMENT_PREFIXES.iter().any(|prefix| matches_prefix(path, prefix)) {
        return RouteClass::Management;
    }

    if matches_prefix(path, "/api") {
        return RouteClass::Bearer;
    }

    RouteClass::Session
}

/// `path` is `prefix` itself or lives under it
fn matches_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .map(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(false)
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Enforce the scheme for the request's route class
///
/// On success the caller's `Identity` is inserted into the request
/// extensions before the handler runs.
pub async fn gatekeeper(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let class = classify(req.uri().path());

    let identity = match class {
        RouteClass::Public => return Ok(next.run(req).await),

        RouteClass::Management => Identity {
            email: ctx.sessions.validate(&jar).await?,
            via: Scheme::Session,
        },

        RouteClass::Bearer => match extract_bearer_token(req.headers()) {
            Some(key) => authenticate_bearer(&ctx, &key, &source_address(&req)).await?,
            // Lets the browser UI call the API with its cookie
            None => Identity {
                email: ctx.sessions.validate(&jar).await?,
                via: Scheme::Session,
            },
        },

        RouteClass::Session => match ctx.sessions.validate(&jar).await {
            Ok(email) => Identity {
                email,
                via: Scheme::Session,
            },
            Err(AuthError::Unauthorized) => return Ok(Redirect::to("/login").into_response()),
            Err(e) => return Err(e),
        },
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

async fn authenticate_bearer(
    ctx: &AppContext,
    key: &str,
    source: &str,
) -> Result<Identity, AuthError> {
    // Limited sources are turned away before the key is looked at
    if ctx.failure_limiter.is_limited(source) {
        metrics::record_bearer_validation("rate_limited");
        tracing::warn!(source = %source, "Bearer attempt from rate-limited source");
        return Err(AuthError::RateLimited {
            retry_after: ctx.failure_limiter.window(),
        });
    }

    match ctx.api_keys.validate(key).await? {
        Some(email) => {
            metrics::record_bearer_validation("valid");
            Ok(Identity {
                email,
                via: Scheme::BearerKey,
            })
        }
        None => {
            metrics::record_bearer_validation("invalid");
            if ctx.failure_limiter.record_failure(source) {
                tracing::warn!(source = %source, "Source exceeded bearer failure threshold");
                return Err(AuthError::RateLimited {
                    retry_after: ctx.failure_limiter.window(),
                });
            }
            Err(AuthError::InvalidCredential)
        }
    }
}

/// Record request count and latency per route class
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let class = classify(req.uri().path());

    let response = next.run(req).await;

    metrics::record_http_request(
        &method,
        class.as_str(),
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
