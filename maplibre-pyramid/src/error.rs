//! Errors which can occur while loading, parsing and placing tiles.

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

use crate::io::scheduler::ScheduleError;

/// Coarse classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    NotFound,
    Server,
    Connection,
    RateLimit,
    Other,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorReason::NotFound => "not found",
            ErrorReason::Server => "server error",
            ErrorReason::Connection => "connection failed",
            ErrorReason::RateLimit => "rate limit exceeded",
            ErrorReason::Other => "request failed",
        })
    }
}

/// A request which could not be answered with data.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}: {message}")]
pub struct ResponseError {
    pub reason: ErrorReason,
    pub message: String,
}

impl ResponseError {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Transient errors may succeed when retried later. Retrying is up to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.reason,
            ErrorReason::Server | ErrorReason::Connection | ErrorReason::RateLimit
        )
    }
}

/// Content which can not be decoded. Retrying does not help.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed vector tile: {0}")]
    VectorTile(String),
    #[error("malformed GeoJSON: {0}")]
    GeoJson(String),
    #[error("undecodable image: {0}")]
    Image(String),
    #[error("malformed glyphs: {0}")]
    Glyphs(String),
    #[error("malformed sprite: {0}")]
    Sprite(String),
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Schedule(Arc<ScheduleError>),
    #[error("invalid style: {0}")]
    Style(String),
    #[error("nothing arrived within {0:?} while loading")]
    Timeout(Duration),
}

impl From<ScheduleError> for Error {
    fn from(error: ScheduleError) -> Self {
        Error::Schedule(Arc::new(error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Style(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, ErrorReason, ParseError, ResponseError};

    #[test]
    fn connection_errors_mention_connect() {
        let error: Error = ResponseError::new(ErrorReason::Connection, "host unreachable").into();
        assert!(error.to_string().contains("onnect"), "{error}");
    }

    #[test]
    fn transient_reasons() {
        assert!(ResponseError::new(ErrorReason::Server, "503").is_transient());
        assert!(ResponseError::new(ErrorReason::RateLimit, "").is_transient());
        assert!(!ResponseError::new(ErrorReason::NotFound, "").is_transient());
        assert!(!ResponseError::new(ErrorReason::Other, "").is_transient());
    }

    #[test]
    fn parse_errors_convert() {
        let error: Error = ParseError::GeoJson("unexpected end".to_string()).into();
        assert!(matches!(error, Error::Parse(ParseError::GeoJson(_))));
    }
}
