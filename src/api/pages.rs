/// Minimal HTML pages for the login flows
use crate::{auth::Identity, context::AppContext, metrics};
use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/", get(home))
        .route("/metrics", get(metrics_text))
}

/// Escape text for HTML element and quoted attribute content
pub fn escape(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n\
         <link rel=\"stylesheet\" href=\"/static/app.css\">\n</head>\n<body>\n<main>\n{}\n</main>\n</body>\n</html>\n",
        escape(title),
        body
    ))
}

fn notices(message: Option<&str>, error: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(message) = message {
        out.push_str(&format!("<p class=\"message\">{}</p>\n", escape(message)));
    }
    if let Some(error) = error {
        out.push_str(&format!("<p class=\"error\">{}</p>\n", escape(error)));
    }
    out
}

/// Browser login page
pub fn login_page(message: Option<&str>, error: Option<&str>) -> Html<String> {
    let body = format!(
        "<h1>Log in</h1>\n{}\
         <form method=\"post\" action=\"/auth/login\">\n\
         <input type=\"email\" name=\"email\" placeholder=\"you@example.com\" autocomplete=\"username webauthn\" required>\n\
         <button type=\"submit\">Email me a login link</button>\n\
         </form>\n\
         <button id=\"passkey-login\" type=\"button\">Log in with a passkey</button>\n\
         <script src=\"/static/passkey.js\"></script>",
        notices(message, error)
    );
    layout("Log in", &body)
}

/// What the CLI login page should show
#[derive(Debug, Default)]
pub struct CliPage<'a> {
    pub message: Option<&'a str>,
    pub error: Option<&'a str>,
    pub has_passkeys: bool,
    pub api_key: Option<&'a str>,
}

/// CLI login page, or the one-time key display once login completes
pub fn cli_page(page: CliPage<'_>) -> Html<String> {
    if let Some(key) = page.api_key {
        let body = format!(
            "<h1>CLI login complete</h1>\n\
             <p>Copy this API key into your CLI. It will not be shown again.</p>\n\
             <pre id=\"api-key\">{}</pre>",
            escape(key)
        );
        return layout("CLI login", &body);
    }

    let passkey = if page.has_passkeys {
        "<button id=\"passkey-login\" type=\"button\" data-next=\"/cli/auth/complete\">Use a passkey</button>\n\
         <script src=\"/static/passkey.js\"></script>"
    } else {
        ""
    };

    let body = format!(
        "<h1>CLI login</h1>\n{}\
         <form method=\"post\" action=\"/cli/auth\">\n\
         <input type=\"email\" name=\"email\" placeholder=\"you@example.com\" required>\n\
         <button type=\"submit\">Email me a login link</button>\n\
         </form>\n{}",
        notices(page.message, page.error),
        passkey
    );
    layout("CLI login", &body)
}

/// Home page for a signed-in browser
async fn home(State(ctx): State<AppContext>, identity: Identity) -> Html<String> {
    let admin = if ctx.users.is_admin(&identity.email) {
        "<p>You are the administrator.</p>\n"
    } else {
        ""
    };

    let body = format!(
        "<h1>Signed in</h1>\n<p>Signed in as <strong>{}</strong>.</p>\n{}\
         <button id=\"passkey-register\" type=\"button\">Add a passkey</button>\n\
         <form method=\"post\" action=\"/auth/logout\"><button type=\"submit\">Log out</button></form>\n\
         <script src=\"/static/passkey.js\"></script>",
        escape(&identity.email),
        admin
    );
    layout("Home", &body)
}

/// Prometheus text exposition
async fn metrics_text(_identity: Identity) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
