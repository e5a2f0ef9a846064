//! Host-side error type.

use http::StatusCode;
use thiserror::Error;

/// Errors raised while reading a request or writing a response.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("too many request headers")]
    TooManyHeaders,

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

impl HostError {
    /// Status to answer with before closing the connection, if the peer
    /// should get one at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HostError::Malformed(_) => Some(StatusCode::BAD_REQUEST),
            HostError::HeadTooLarge(_) | HostError::TooManyHeaders => {
                Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
            }
            HostError::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            HostError::Io(_) | HostError::InvalidStatus(_) | HostError::InvalidHeader { .. } => None,
        }
    }

    pub(crate) fn invalid_header(name: &str, reason: impl ToString) -> Self {
        HostError::InvalidHeader {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
