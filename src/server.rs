/// HTTP server setup and routing
use crate::{
    api::middleware::{gatekeeper, track_metrics},
    context::AppContext,
    error::{AuthError, AuthResult},
};
use axum::{http::StatusCode, middleware, response::Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{compression::CompressionLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    let static_files = ServeDir::new(&ctx.config.storage.static_directory);

    Router::new()
        .merge(crate::api::routes(&ctx))
        .nest_service("/static", static_files)
        .fallback(not_found)
        // Provide state - converts Router<AppContext> to Router<()>
        .with_state(ctx.clone())
        // Every request passes the gatekeeper before reaching a handler,
        // the 404 fallback included
        .layer(middleware::from_fn_with_state(ctx, gatekeeper))
        .layer(middleware::from_fn(track_metrics))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server
pub async fn serve(ctx: AppContext) -> AuthResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("Doorkeeper listening on {}", addr);
    info!("   Base URL: {}", ctx.config.service.base_url);
    info!("   Admin: {}", ctx.config.authentication.admin_email);

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AuthError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    // Connect info feeds the per-source bearer failure limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| AuthError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{issuance::LINK_SENT_MESSAGE, mailer::RecordingSender};
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{header, Request, Response},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    const ADMIN: &str = "admin@example.com";

    async fn setup() -> (tempfile::TempDir, AppContext, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        let (dir, ctx) = AppContext::for_tests(sender.clone()).await;
        (dir, ctx, sender)
    }

    fn request(method: &str, uri: &str) -> axum::http::request::Builder {
        request_from(method, uri, [203, 0, 113, 7])
    }

    fn request_from(method: &str, uri: &str, peer: [u8; 4]) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(extensions) = builder.extensions_mut() {
            extensions.insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        }
        builder
    }

    fn login_form(uri: &str, email: &str, peer: [u8; 4]) -> Request<Body> {
        request_from("POST", uri, peer)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("email={}", email.replace('@', "%40"))))
            .unwrap()
    }

    async fn send(ctx: &AppContext, req: Request<Body>) -> Response<Body> {
        build_router(ctx.clone()).oneshot(req).await.unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn session_cookie(response: &Response<Body>) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("response sets a cookie")
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn login_cookie(ctx: &AppContext, email: &str) -> String {
        let cookie = ctx.sessions.create(email).await.unwrap();
        format!("{}={}", cookie.name(), cookie.value())
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (_dir, ctx, _) = setup().await;

        let response = send(&ctx, request("GET", "/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"status\":\"ok\""));

        let response = send(&ctx, request("GET", "/health/ready").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_404() {
        let (_dir, ctx, _) = setup().await;
        let cookie = login_cookie(&ctx, ADMIN).await;

        let response = send(
            &ctx,
            request("GET", "/no/such/page")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("Endpoint not found"));
    }

    #[tokio::test]
    async fn test_unknown_paths_still_require_credentials() {
        let (_dir, ctx, _) = setup().await;

        let response = send(&ctx, request("GET", "/api/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&ctx, request("GET", "/no/such/page").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let response = send(&ctx, request("GET", "/api/users/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_home_without_session_redirects_to_login() {
        let (_dir, ctx, _) = setup().await;

        let response = send(&ctx, request("GET", "/").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_unauthorized_address_gets_generic_message_and_no_token() {
        let (_dir, ctx, sender) = setup().await;

        let response = send(
            &ctx,
            request("POST", "/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("email=alice%40example.com"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains(LINK_SENT_MESSAGE));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auth_tokens")
            .fetch_one(&ctx.db)
            .await
            .unwrap();
        assert_eq!(tokens, 0);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_magic_link_login_sets_session_cookie() {
        let (_dir, ctx, sender) = setup().await;

        let response = send(
            &ctx,
            request("POST", "/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("email=Admin%40Example.com"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let token = sender.wait_for_token("admin@example.com").await.unwrap();

        let uri = format!("/auth/verify?token={}", token);
        let response = send(&ctx, request("GET", &uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        let cookie = session_cookie(&response);

        let response = send(
            &ctx,
            request("GET", "/")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // Same link a second time
        let response = send(&ctx, request("GET", &uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Invalid or expired login link"));
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let (_dir, ctx, _) = setup().await;
        let cookie = login_cookie(&ctx, ADMIN).await;

        let response = send(
            &ctx,
            request("POST", "/auth/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let response = send(
            &ctx,
            request("GET", "/")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_cli_flow_issues_key_once_session_exists() {
        let (_dir, ctx, sender) = setup().await;
        ctx.users.add("bob@example.com", "Bob").await.unwrap();

        let response = send(
            &ctx,
            request("POST", "/cli/auth")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("email=bob%40example.com"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let token = sender.wait_for_token("bob@example.com").await.unwrap();

        let uri = format!("/cli/auth/verify?token={}", token);
        let response = send(&ctx, request("GET", &uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/cli/auth/complete");
        let cookie = session_cookie(&response);

        let response = send(
            &ctx,
            request("GET", "/cli/auth/complete")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("dk_"));

        let keys = ctx.api_keys.list("bob@example.com").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "CLI");
    }

    #[tokio::test]
    async fn test_cli_complete_without_session_restarts() {
        let (_dir, ctx, _) = setup().await;

        let response = send(
            &ctx,
            request("GET", "/cli/auth/complete").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/cli/auth");
    }

    #[tokio::test]
    async fn test_bearer_key_reaches_resource_api() {
        let (_dir, ctx, _) = setup().await;
        let (raw, _) = ctx.api_keys.create("laptop", ADMIN).await.unwrap();

        let response = send(
            &ctx,
            request("GET", "/api/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", raw))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains(ADMIN));
        assert!(body.contains("\"scheme\":\"bearer\""));
    }

    #[tokio::test]
    async fn test_session_cookie_falls_back_on_resource_api() {
        let (_dir, ctx, _) = setup().await;
        let cookie = login_cookie(&ctx, ADMIN).await;

        let response = send(
            &ctx,
            request("GET", "/api/me")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"scheme\":\"session\""));

        let response = send(&ctx, request("GET", "/api/me").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_bearer_keys_lead_to_rate_limit() {
        let (_dir, ctx, _) = setup().await;
        let (raw, _) = ctx.api_keys.create("laptop", ADMIN).await.unwrap();
        let threshold = ctx.config.rate_limit.bearer_failure_threshold;

        let bad_attempt = || {
            request("GET", "/api/me")
                .header(header::AUTHORIZATION, "Bearer dk_not-a-real-key")
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..threshold {
            let response = send(&ctx, bad_attempt()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        // The failure that crosses the threshold is already answered with 429
        let response = send(&ctx, bad_attempt()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        // Even the valid key is refused while the source is limited
        let response = send(
            &ctx,
            request("GET", "/api/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", raw))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_bearer_key_cannot_manage_keys() {
        let (_dir, ctx, _) = setup().await;
        let (raw, _) = ctx.api_keys.create("laptop", ADMIN).await.unwrap();

        let response = send(
            &ctx,
            request("GET", "/api/keys")
                .header(header::AUTHORIZATION, format!("Bearer {}", raw))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_key_management_over_session() {
        let (_dir, ctx, _) = setup().await;
        let cookie = login_cookie(&ctx, ADMIN).await;

        let response = send(
            &ctx,
            request("POST", "/api/keys")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"deploy"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(created["key"].as_str().unwrap().starts_with("dk_"));
        assert_eq!(created["name"], "deploy");
        assert!(created.get("key_hash").is_none());
        let id = created["id"].as_i64().unwrap();

        let response = send(
            &ctx,
            request("DELETE", &format!("/api/keys/{}", id))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(ctx.api_keys.list(ADMIN).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_admin_removes_users() {
        let (_dir, ctx, _) = setup().await;
        let bob = ctx.users.add("bob@example.com", "Bob").await.unwrap();
        let carol = ctx.users.add("carol@example.com", "Carol").await.unwrap();
        let uri = format!("/api/users/{}", carol.id);

        let bob_cookie = login_cookie(&ctx, &bob.email).await;
        let response = send(
            &ctx,
            request("DELETE", &uri)
                .header(header::COOKIE, bob_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(ctx.users.is_authorized("carol@example.com").await.unwrap());

        let admin_cookie = login_cookie(&ctx, ADMIN).await;
        let response = send(
            &ctx,
            request("DELETE", &uri)
                .header(header::COOKIE, admin_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!ctx.users.is_authorized("carol@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_user_is_conflict() {
        let (_dir, ctx, _) = setup().await;
        ctx.users.add("bob@example.com", "Bob").await.unwrap();
        let cookie = login_cookie(&ctx, ADMIN).await;

        let response = send(
            &ctx,
            request("POST", "/api/users")
                .header(header::COOKIE, cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"BOB@example.com"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_passkey_login_begin_is_public() {
        let (_dir, ctx, _) = setup().await;

        let response = send(
            &ctx,
            request("POST", "/passkey/login/begin").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("challenge"));
    }

    #[tokio::test]
    async fn test_submission_throttle_is_per_source() {
        let (_dir, ctx, sender) = setup().await;
        let quota = ctx.config.rate_limit.login_requests_per_minute;
        let flood = [6, 6, 6, 6];

        for _ in 0..quota {
            let response = send(&ctx, login_form("/auth/login", "alice@example.com", flood)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = send(&ctx, login_form("/auth/login", "alice@example.com", flood)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // A flood from one address does not lock out everyone else
        let response = send(&ctx, login_form("/auth/login", ADMIN, [10, 0, 0, 1])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains(LINK_SENT_MESSAGE));
        assert!(sender.wait_for_token(ADMIN).await.is_some());
    }
}
