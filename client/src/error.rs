use reqwest::StatusCode;
use thiserror::Error;

use fanctl_common::{CodecError, SlotId, ValidationError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path} answered HTTP {status}")]
    Status { path: String, status: StatusCode },
    #[error("{path} returned a malformed body: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failure of one session operation. None of these end the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("device reported failure: {0}")]
    Device(String),
    #[error("schedule slot {0} does not exist")]
    NotFound(SlotId),
}

impl SessionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}
