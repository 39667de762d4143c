use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain::error::ErrorKind as DomainErrorKind;
use log::*;
use realtime::error::{AuthErrorKind, ErrorKind as RealtimeErrorKind};
use serde_json::json;
use upstream::ErrorKind as UpstreamErrorKind;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors that reach the HTTP boundary, tagged by the layer that raised them.
#[derive(Debug)]
pub enum Error {
    Domain(domain::Error),
    Realtime(realtime::Error),
    Upstream(upstream::Error),
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Domain(e) => Some(e),
            Error::Realtime(e) => Some(e),
            Error::Upstream(e) => Some(e),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        match self {
            Error::Domain(e) => write!(fmt, "{e}"),
            Error::Realtime(e) => write!(fmt, "{e}"),
            Error::Upstream(e) => write!(fmt, "{e}"),
        }
    }
}

impl Error {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            Error::Domain(e) => match e.error_kind {
                DomainErrorKind::Token(_) => (StatusCode::UNAUTHORIZED, "Invalid token"),
                DomainErrorKind::Config => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                }
            },
            Error::Realtime(e) => match &e.error_kind {
                RealtimeErrorKind::Auth(AuthErrorKind::Missing) => {
                    (StatusCode::UNAUTHORIZED, "Authentication required")
                }
                RealtimeErrorKind::Auth(AuthErrorKind::Invalid) => {
                    (StatusCode::UNAUTHORIZED, "Invalid token")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            },
            Error::Upstream(e) => match e.error_kind {
                UpstreamErrorKind::Disconnected => {
                    (StatusCode::SERVICE_UNAVAILABLE, "MQTT broker unavailable")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!("Request failed: {self}");
        } else {
            debug!("Request refused: {self}");
        }

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

impl From<domain::Error> for Error {
    fn from(err: domain::Error) -> Self {
        Error::Domain(err)
    }
}

impl From<realtime::Error> for Error {
    fn from(err: realtime::Error) -> Self {
        Error::Realtime(err)
    }
}

impl From<upstream::Error> for Error {
    fn from(err: upstream::Error) -> Self {
        Error::Upstream(err)
    }
}
