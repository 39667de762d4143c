//! Authentication capability for the gateway.
//!
//! Connections present a bearer token; this crate turns that token into an
//! [`events::Identity`] or a typed failure. Everything else treats
//! verification as an opaque [`jwt::TokenVerifier`].

pub mod error;
pub mod jwt;

pub use error::{Error, ErrorKind};
