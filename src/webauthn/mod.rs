/// Passkey ceremonies
///
/// Registration state is keyed by the registering address, so a second
/// registration started for the same address replaces the first. Discoverable
/// login state is keyed by the challenge itself, so any number of browsers can
/// be mid-login at once. Neither survives a restart.
use crate::config::PasskeyConfig;
use crate::credentials::PasskeyStore;
use crate::db::models::PasskeyRecord;
use crate::directory::UserStore;
use crate::error::{AuthError, AuthResult};
use crate::metrics;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, CredentialID, DiscoverableAuthentication, DiscoverableKey,
    PasskeyRegistration, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse, Webauthn, WebauthnBuilder,
};

struct PendingRegistration {
    created_at: Instant,
    registration: PasskeyRegistration,
}

struct PendingLogin {
    created_at: Instant,
    authentication: DiscoverableAuthentication,
}

/// Stable WebAuthn user handle for an address
///
/// The first 16 bytes of sha256 over the lower-cased address, so the same
/// address always maps to the same handle without storing it anywhere.
pub fn user_handle(email: &str) -> Uuid {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Registration and discoverable-login orchestration
pub struct PasskeyCeremonies {
    webauthn: Webauthn,
    ttl: Duration,
    passkeys: PasskeyStore,
    users: UserStore,
    registrations: Mutex<HashMap<String, PendingRegistration>>,
    logins: Mutex<HashMap<String, PendingLogin>>,
}

impl PasskeyCeremonies {
    pub fn new(config: &PasskeyConfig, passkeys: PasskeyStore, users: UserStore) -> AuthResult<Self> {
        let origin = Url::parse(&config.rp_origin)
            .map_err(|e| AuthError::Validation(format!("Invalid passkey origin: {}", e)))?;
        let webauthn = WebauthnBuilder::new(&config.rp_id, &origin)?
            .rp_name(&config.rp_name)
            .build()?;

        Ok(Self {
            webauthn,
            ttl: Duration::from_secs(config.ceremony_ttl_secs),
            passkeys,
            users,
            registrations: Mutex::new(HashMap::new()),
            logins: Mutex::new(HashMap::new()),
        })
    }

    /// Start registering a new passkey for `email`
    ///
    /// The challenge excludes credentials the address already owns.
    pub async fn begin_registration(&self, email: &str) -> AuthResult<CreationChallengeResponse> {
        let existing: Vec<CredentialID> = self
            .passkeys
            .webauthn_credentials(email)
            .await?
            .iter()
            .map(|passkey| passkey.cred_id().clone())
            .collect();
        let exclude = if existing.is_empty() { None } else { Some(existing) };

        let (challenge, registration) =
            self.webauthn
                .start_passkey_registration(user_handle(email), email, email, exclude)?;

        let mut registrations = self.registrations.lock().await;
        registrations.retain(|_, pending| pending.created_at.elapsed() < self.ttl);
        registrations.insert(
            email.to_string(),
            PendingRegistration {
                created_at: Instant::now(),
                registration,
            },
        );

        Ok(challenge)
    }

    /// Verify the authenticator's response and store the new passkey
    ///
    /// The pending state is consumed whether or not verification succeeds.
    pub async fn finish_registration(
        &self,
        email: &str,
        response: &RegisterPublicKeyCredential,
        name: &str,
    ) -> AuthResult<PasskeyRecord> {
        let pending = self
            .registrations
            .lock()
            .await
            .remove(email)
            .filter(|pending| pending.created_at.elapsed() < self.ttl)
            .ok_or_else(|| AuthError::WebAuthn("No registration in progress".to_string()))?;

        let passkey = match self
            .webauthn
            .finish_passkey_registration(response, &pending.registration)
        {
            Ok(passkey) => passkey,
            Err(e) => {
                metrics::record_passkey_ceremony("registration", false);
                return Err(e.into());
            }
        };

        let record = self.passkeys.save(email, name, &passkey).await?;
        metrics::record_passkey_ceremony("registration", true);
        Ok(record)
    }

    /// Start a username-less login
    pub async fn begin_login(&self) -> AuthResult<RequestChallengeResponse> {
        let (challenge, authentication) = self.webauthn.start_discoverable_authentication()?;
        let key = challenge_key(&challenge)?;

        let mut logins = self.logins.lock().await;
        logins.retain(|_, pending| pending.created_at.elapsed() < self.ttl);
        logins.insert(
            key,
            PendingLogin {
                created_at: Instant::now(),
                authentication,
            },
        );

        Ok(challenge)
    }

    /// Verify a discoverable assertion and return the address it belongs to
    ///
    /// The address is found by matching the assertion's user handle against
    /// the handle of every authorized address.
    pub async fn finish_login(&self, credential: &PublicKeyCredential) -> AuthResult<String> {
        let key = challenge_from_client_data(credential.response.client_data_json.as_ref())?;
        let pending = self
            .logins
            .lock()
            .await
            .remove(&key)
            .filter(|pending| pending.created_at.elapsed() < self.ttl)
            .ok_or_else(|| AuthError::WebAuthn("No login in progress".to_string()))?;

        let result = self.verify_login(credential, pending.authentication).await;
        metrics::record_passkey_ceremony("login", result.is_ok());
        result
    }

    async fn verify_login(
        &self,
        credential: &PublicKeyCredential,
        authentication: DiscoverableAuthentication,
    ) -> AuthResult<String> {
        let (handle, _) = self
            .webauthn
            .identify_discoverable_authentication(credential)
            .map_err(|e| {
                tracing::warn!(error = %e, "Passkey assertion carried no usable user handle");
                AuthError::InvalidCredential
            })?;

        let email = self
            .users
            .all_emails()
            .await?
            .into_iter()
            .find(|email| user_handle(email) == handle)
            .ok_or(AuthError::InvalidCredential)?;

        let mut passkeys = self.passkeys.webauthn_credentials(&email).await?;
        if passkeys.is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        let keys: Vec<DiscoverableKey> = passkeys.iter().map(DiscoverableKey::from).collect();

        let result = self
            .webauthn
            .finish_discoverable_authentication(credential, authentication, &keys)
            .map_err(|e| {
                tracing::warn!(email = %email, error = %e, "Passkey assertion rejected");
                AuthError::InvalidCredential
            })?;

        // Keep the signature counter current
        for passkey in passkeys.iter_mut() {
            if passkey.update_credential(&result) == Some(true) {
                self.passkeys.refresh(passkey).await?;
            }
        }

        tracing::info!(email = %email, "Passkey login verified");
        Ok(email)
    }

    /// Drop ceremonies older than the TTL; returns how many were removed
    pub async fn prune_expired(&self) -> usize {
        let mut removed = 0;

        let mut registrations = self.registrations.lock().await;
        let before = registrations.len();
        registrations.retain(|_, pending| pending.created_at.elapsed() < self.ttl);
        removed += before - registrations.len();
        drop(registrations);

        let mut logins = self.logins.lock().await;
        let before = logins.len();
        logins.retain(|_, pending| pending.created_at.elapsed() < self.ttl);
        removed += before - logins.len();

        removed
    }
}

/// Map key for a login challenge: its base64url text without padding
fn challenge_key(challenge: &RequestChallengeResponse) -> AuthResult<String> {
    let value = serde_json::to_value(&challenge.public_key.challenge)
        .map_err(|e| AuthError::Internal(format!("Failed to encode challenge: {}", e)))?;

    value
        .as_str()
        .map(|s| s.trim_end_matches('=').to_string())
        .ok_or_else(|| AuthError::Internal("Challenge did not encode as a string".to_string()))
}

/// Pull the challenge the browser signed out of `clientDataJSON`
fn challenge_from_client_data(client_data_json: &[u8]) -> AuthResult<String> {
    let client_data: serde_json::Value = serde_json::from_slice(client_data_json)
        .map_err(|_| AuthError::WebAuthn("Malformed client data".to_string()))?;

    client_data
        .get("challenge")
        .and_then(|c| c.as_str())
        .map(|c| c.trim_end_matches('=').to_string())
        .ok_or_else(|| AuthError::WebAuthn("Client data carries no challenge".to_string()))
}
