/// Authentication extractors
///
/// The gatekeeper resolves who is calling and stores an `Identity` in the
/// request extensions; handlers pull it back out with these extractors.
use crate::{context::AppContext, error::AuthError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Verified caller address, attached by the gatekeeper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub via: Scheme,
}

/// How the caller proved who they are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Session,
    BearerKey,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(AuthError::Unauthorized)
    }
}

/// Identity that must also be the administrator
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub email: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminIdentity {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;

        if !state.users.is_admin(&identity.email) {
            tracing::warn!(email = %identity.email, "Non-admin attempted an admin operation");
            return Err(AuthError::Forbidden("Admin access required".to_string()));
        }

        Ok(AdminIdentity {
            email: identity.email,
        })
    }
}
