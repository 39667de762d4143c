use crate::extractors::bearer_token::BearerToken;
use crate::{AppState, Error};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use events::Identity;
use log::*;
use realtime::error::{AuthErrorKind, ErrorKind};

pub(crate) struct AuthenticatedUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = Error;

    // Verifies the bearer token against the gateway's verifier. A request
    // without one is refused with 401 before the handler runs.
    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state)
            .await
            .unwrap_or(BearerToken(None));

        let token = token
            .ok_or_else(|| realtime::Error::new(ErrorKind::Auth(AuthErrorKind::Missing)))?;

        let identity = state.verifier.verify(&token).map_err(|e| {
            warn!("Rejected bearer token on {}: {e}", parts.uri.path());
            e
        })?;

        trace!("Authenticated user {}", identity.id);
        Ok(AuthenticatedUser(identity))
    }
}
