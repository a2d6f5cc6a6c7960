/// Magic link delivery
use crate::{
    config::EmailConfig,
    error::{AuthError, AuthResult},
};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

/// Which verification endpoint a magic link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Browser login, lands on a session
    Browser,
    /// CLI login, lands on a freshly minted API key
    Cli,
}

impl LinkKind {
    pub fn verify_path(self) -> &'static str {
        match self {
            LinkKind::Browser => "/auth/verify",
            LinkKind::Cli => "/cli/auth/verify",
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Browser => "browser",
            LinkKind::Cli => "cli",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            LinkKind::Browser => "Doorkeeper login link",
            LinkKind::Cli => "Doorkeeper CLI login link",
        }
    }
}

/// Outbound collaborator that delivers magic links
///
/// Returns the link that was delivered (or logged).
#[async_trait]
pub trait MagicLinkSender: Send + Sync {
    async fn send_magic_link(&self, email: &str, token: &str, kind: LinkKind) -> AuthResult<String>;
}

/// Build the verification URL for `token`
pub fn magic_link(base_url: &str, token: &str, kind: LinkKind) -> String {
    format!("{}{}?token={}", base_url.trim_end_matches('/'), kind.verify_path(), token)
}

/// SMTP mailer
///
/// In dev mode links are written to the log instead of being sent.
#[derive(Clone)]
pub struct Mailer {
    config: Option<EmailConfig>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    base_url: String,
    dev_mode: bool,
}

impl Mailer {
    /// Create a new mailer
    pub fn new(config: Option<EmailConfig>, base_url: &str, dev_mode: bool) -> AuthResult<Self> {
        let transport = match &config {
            Some(email_config) => Some(
                AsyncSmtpTransport::<Tokio1Executor>::from_url(&email_config.smtp_url)
                    .map_err(|e| AuthError::Mail(format!("SMTP setup failed: {}", e)))?
                    .build(),
            ),
            None => None,
        };

        Ok(Self {
            config,
            transport,
            base_url: base_url.to_string(),
            dev_mode,
        })
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AuthResult<()> {
        let (Some(config), Some(transport)) = (&self.config, &self.transport) else {
            return Err(AuthError::Mail("Email transport not configured".to_string()));
        };

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| AuthError::Mail(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| AuthError::Mail(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AuthError::Mail(format!("Failed to build email: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| AuthError::Mail(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %to, subject = %subject, "Sent email");
        Ok(())
    }

    /// Check if email is configured
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl MagicLinkSender for Mailer {
    async fn send_magic_link(&self, email: &str, token: &str, kind: LinkKind) -> AuthResult<String> {
        let link = magic_link(&self.base_url, token, kind);

        if self.dev_mode {
            tracing::info!(email = %email, kind = kind.as_str(), link = %link, "[DEV] Magic link");
            return Ok(link);
        }

        let body = format!(
            "Click the link below to log in:\n\n{}\n\nThis link expires in 15 minutes and can only be used once.\n",
            link
        );
        self.send_email(email, kind.subject(), &body).await?;

        Ok(link)
    }
}

/// Sender that records links instead of delivering them
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSender {
    pub sent: std::sync::Mutex<Vec<(String, String, LinkKind)>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String, LinkKind)> {
        self.sent.lock().unwrap().clone()
    }

    /// Token of the most recent link sent to `email`
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(to, _, _)| to == email)
            .map(|(_, token, _)| token)
    }

    /// Like `last_token_for`, but waits up to two seconds for delivery
    pub async fn wait_for_token(&self, email: &str) -> Option<String> {
        for _ in 0..200 {
            if let Some(token) = self.last_token_for(email) {
                return Some(token);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        None
    }
}

#[cfg(test)]
#[async_trait]
impl MagicLinkSender for RecordingSender {
    async fn send_magic_link(&self, email: &str, token: &str, kind: LinkKind) -> AuthResult<String> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), token.to_string(), kind));
        if self.fail {
            return Err(AuthError::Mail("recording sender told to fail".to_string()));
        }
        Ok(magic_link("http://localhost:8080", token, kind))
    }
}
