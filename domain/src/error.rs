//! Error types for the `domain` layer.
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Holds the kind of failure plus the lower-level error that caused it, so
/// upper layers can map kinds to transport responses while logs keep the
/// original cause.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Enum representing the major categories of errors in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Token(TokenErrorKind),
    Config,
}

/// Why a presented token was rejected.
#[derive(Debug, PartialEq)]
pub enum TokenErrorKind {
    Missing,
    Invalid,
    Expired,
}

impl Error {
    pub fn token(kind: TokenErrorKind) -> Self {
        Error {
            source: None,
            error_kind: ErrorKind::Token(kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Domain Error: {self:?}")
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtErrorKind;

        let error_kind = match err.kind() {
            JwtErrorKind::ExpiredSignature => ErrorKind::Token(TokenErrorKind::Expired),
            JwtErrorKind::InvalidKeyFormat => ErrorKind::Config,
            _ => ErrorKind::Token(TokenErrorKind::Invalid),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
