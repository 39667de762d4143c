//! Verification and issuance of HS256 bearer tokens.
//!
//! # Example
//!
//! ```rust
//! use domain::jwt::{issue_token, JwtVerifier, TokenVerifier};
//! use events::Identity;
//!
//! let identity = Identity {
//!     id: "u1".to_string(),
//!     username: "maya".to_string(),
//!     role: "user".to_string(),
//! };
//! let token = issue_token(&identity, "secret", chrono::Duration::hours(24)).unwrap();
//! let verifier = JwtVerifier::new("secret");
//! assert_eq!(verifier.verify(&token).unwrap(), identity);
//! ```

use crate::error::{Error, TokenErrorKind};
use chrono::{Duration, Utc};
use claims::IdentityClaims;
use events::Identity;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::*;

pub(crate) mod claims;

/// Turns a presented credential into an identity.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, Error>;
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, Error> {
        if token.trim().is_empty() {
            return Err(Error::token(TokenErrorKind::Missing));
        }

        let data = decode::<IdentityClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Rejected bearer token: {e}");
            Error::from(e)
        })?;

        Ok(data.claims.into())
    }
}

/// Signs a token for `identity` that expires after `ttl`.
pub fn issue_token(identity: &Identity, secret: &str, ttl: Duration) -> Result<String, Error> {
    let now = Utc::now();
    let claims = IdentityClaims {
        id: identity.id.clone(),
        username: identity.username.clone(),
        role: identity.role.clone(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn identity() -> Identity {
        Identity {
            id: "u1".to_string(),
            username: "maya".to_string(),
            role: "admin".to_string(),
        }
    }

    #[test]
    fn verify_round_trips_identity() {
        let token = issue_token(&identity(), "secret", Duration::hours(1)).unwrap();
        let verified = JwtVerifier::new("secret").verify(&token).unwrap();
        assert_eq!(verified, identity());
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = issue_token(&identity(), "secret", Duration::hours(1)).unwrap();
        let err = JwtVerifier::new("other").verify(&token).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::Invalid));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        // Well past the default 60s leeway
        let token = issue_token(&identity(), "secret", Duration::hours(-2)).unwrap();
        let err = JwtVerifier::new("secret").verify(&token).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::Expired));
    }

    #[test]
    fn empty_token_is_missing() {
        let err = JwtVerifier::new("secret").verify("  ").unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::Missing));
    }

    #[test]
    fn garbage_token_is_invalid() {
        let err = JwtVerifier::new("secret").verify("not.a.jwt").unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::Invalid));
    }
}
