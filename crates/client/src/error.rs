//! Client error handling

use fhir_core::{FhirError, OperationOutcome};
use reqwest::StatusCode;
use thiserror::Error;

use crate::transport::{BoxError, HttpResponse};

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, DNS, timeout or cancellation. Usually worth retrying.
    Transport,
    /// The server answered with a non-2xx status
    Protocol,
    /// Caller-side misuse, raised before or instead of a network call
    Usage,
}

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport failure: {0}")]
    Transport(#[source] BoxError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("FHIR server returned {status}{}", describe(.outcome))]
    Protocol {
        status: StatusCode,
        outcome: Option<OperationOutcome>,
        response: Box<HttpResponse>,
    },

    #[error("Refusing to fetch {url}: not under base URL {base}")]
    CrossOrigin { url: String, base: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Response from {url} is not a Bundle (got {found})")]
    NotABundle { url: String, found: String },

    #[error("Expected exactly one match, found none")]
    NoMatch,

    #[error("Expected exactly one match, found {0}")]
    MultipleMatches(usize),

    #[error("Server returned no content for {0}")]
    EmptyResponse(String),

    #[error("Navigator is not attached to a client")]
    Detached,

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Resource(#[from] FhirError),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn describe(outcome: &Option<OperationOutcome>) -> String {
    outcome
        .as_ref()
        .map(|o| format!(": {}", o))
        .unwrap_or_default()
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) | ClientError::Cancelled => ErrorKind::Transport,
            ClientError::Protocol { .. } => ErrorKind::Protocol,
            _ => ErrorKind::Usage,
        }
    }

    /// HTTP status of a protocol failure
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// OperationOutcome returned with a protocol failure, when the body held one
    pub fn outcome(&self) -> Option<&OperationOutcome> {
        match self {
            ClientError::Protocol { outcome, .. } => outcome.as_ref(),
            _ => None,
        }
    }

    /// Raw response of a protocol failure
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            ClientError::Protocol { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// 409/412: the server rejected a stale write
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED)
        )
    }
}
