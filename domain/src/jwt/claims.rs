use events::Identity;
use serde::{Deserialize, Serialize};

/// Claims carried by a gateway bearer token.
///
/// The identity fields sit at the top level of the token, next to the
/// registered `iat`/`exp` claims.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IdentityClaims {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) role: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
}

impl From<IdentityClaims> for Identity {
    fn from(claims: IdentityClaims) -> Self {
        Identity {
            id: claims.id,
            username: claims.username,
            role: claims.role,
        }
    }
}
