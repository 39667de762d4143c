//! Error types for the `realtime` crate.
//!
//! Every kind here is handled inside the delivery layer: it is logged,
//! counted in a report, or turned into a refusal. None of them is allowed to
//! take the process down.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// A connection id was registered twice
    DuplicateId,
    Auth(AuthErrorKind),
    Push(PushErrorKind),
    /// A bidirectional connection left a liveness probe unanswered
    ProbeTimeout,
}

/// Reasons a handshake was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthErrorKind {
    Missing,
    Invalid,
}

/// Reasons a single push to a connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushErrorKind {
    /// The transport side of the connection is gone
    Closed,
    /// The connection's outbox is full; the consumer is too slow
    Overflow,
    Serialization,
    /// A transport write did not finish within the push timeout
    Timeout,
}

impl fmt::Display for PushErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PushErrorKind::Closed => write!(f, "transport closed"),
            PushErrorKind::Overflow => write!(f, "outbox full"),
            PushErrorKind::Serialization => write!(f, "serialization failed"),
            PushErrorKind::Timeout => write!(f, "write timed out"),
        }
    }
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Error {
            source: None,
            error_kind,
        }
    }

    pub fn auth(&self) -> Option<&AuthErrorKind> {
        match &self.error_kind {
            ErrorKind::Auth(kind) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Realtime Error: {:?}", self.error_kind)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// Token failures collapse to the two handshake outcomes clients can see.
impl From<domain::Error> for Error {
    fn from(err: domain::Error) -> Self {
        use domain::error::{ErrorKind as DomainErrorKind, TokenErrorKind};

        let auth_kind = match err.error_kind {
            DomainErrorKind::Token(TokenErrorKind::Missing) => AuthErrorKind::Missing,
            _ => AuthErrorKind::Invalid,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Auth(auth_kind),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Push(PushErrorKind::Serialization),
        }
    }
}
