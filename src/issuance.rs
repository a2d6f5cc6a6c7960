/// Credential issuance flows
///
/// Turns a proof of address ownership into a standing credential: a magic
/// link becomes a session, and a CLI login additionally becomes an API key.
use crate::credentials::{ApiKeyStore, SessionStore, TokenStore};
use crate::directory::UserStore;
use crate::error::{AuthError, AuthResult};
use crate::mailer::{LinkKind, MagicLinkSender};
use crate::metrics;
use axum_extra::extract::cookie::Cookie;
use std::sync::Arc;

/// Shown after every well-formed login submission, authorized or not
pub const LINK_SENT_MESSAGE: &str =
    "If that email is registered, a login link has been sent. Check your inbox.";

/// Name given to keys minted by the CLI login flow
pub const CLI_KEY_NAME: &str = "CLI";

#[derive(Clone)]
pub struct Issuer {
    tokens: TokenStore,
    sessions: SessionStore,
    api_keys: ApiKeyStore,
    users: UserStore,
    sender: Arc<dyn MagicLinkSender>,
}

impl Issuer {
    pub fn new(
        tokens: TokenStore,
        sessions: SessionStore,
        api_keys: ApiKeyStore,
        users: UserStore,
        sender: Arc<dyn MagicLinkSender>,
    ) -> Self {
        Self {
            tokens,
            sessions,
            api_keys,
            users,
            sender,
        }
    }

    /// Handle a login-link request for `email`
    ///
    /// Only an authorized address gets a token and a mail, but the caller
    /// always sees `LINK_SENT_MESSAGE`. The authorization check, issuance
    /// and delivery all run on a detached task, so the reply takes the same
    /// time whichever way the check goes. Problems there are logged, never
    /// reported.
    pub async fn request_magic_link(&self, email: &str, kind: LinkKind) -> AuthResult<&'static str> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AuthError::Validation("Email is required".to_string()));
        }

        let issuer = self.clone();
        tokio::spawn(async move { issuer.deliver_magic_link(email, kind).await });

        Ok(LINK_SENT_MESSAGE)
    }

    async fn deliver_magic_link(&self, email: String, kind: LinkKind) {
        match self.users.is_authorized(&email).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(flow = kind.as_str(), "Login link requested for unauthorized address");
                metrics::record_magic_link(kind.as_str(), "skipped");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to check address authorization");
                return;
            }
        }

        let token = match self.tokens.issue(&email).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "Failed to issue login token");
                return;
            }
        };

        // The token stays valid even if delivery fails
        match self.sender.send_magic_link(&email, &token, kind).await {
            Ok(_) => metrics::record_magic_link(kind.as_str(), "issued"),
            Err(e) => {
                tracing::warn!(email = %email, error = %e, "Failed to deliver magic link");
                metrics::record_magic_link(kind.as_str(), "delivery_failed");
            }
        }
    }

    /// Redeem a magic link token and open a session for its address
    ///
    /// Returns the address and the session cookie. An address that lost its
    /// authorization after the link was sent is rejected like a bad token.
    pub async fn redeem_magic_link(&self, token: &str) -> AuthResult<(String, Cookie<'static>)> {
        let redeemed = self.tokens.redeem(token).await;
        metrics::record_token_redemption(redeemed.is_ok());
        let email = redeemed?;

        if !self.users.is_authorized(&email).await? {
            tracing::warn!(email = %email, "Redeemed token for an address no longer authorized");
            return Err(AuthError::InvalidCredential);
        }

        let cookie = self.sessions.create(&email).await?;
        tracing::info!(email = %email, "Magic link login");

        Ok((email, cookie))
    }

    /// Mint the API key handed to a CLI at the end of its login
    pub async fn mint_cli_key(&self, email: &str) -> AuthResult<String> {
        let (raw_key, _) = self.api_keys.create(CLI_KEY_NAME, email).await?;
        Ok(raw_key)
    }
}
