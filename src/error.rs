//! Error types for the conversational core.
//!
//! Each boundary has its own type so the origin of a failure stays visible:
//! request validation, knowledge-base loading and the completion backend.

use std::path::PathBuf;

use crate::events::{Domain, ErrorBody};

/// Errors surfaced to callers of the controller and session store.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Rejected before any backend call
    #[error("validation error: {0}")]
    Validation(String),
    /// Completion backend failed before or during streaming
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A streamed turn ended with an error event
    #[error("{0}")]
    Failed(String),
}

impl ChatError {
    pub fn empty_text() -> Self {
        ChatError::Validation("Empty text.".to_string())
    }

    /// Whether this should map to a 4xx-class response.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }
}

impl From<&ChatError> for ErrorBody {
    fn from(err: &ChatError) -> Self {
        let error = match err {
            ChatError::Validation(message) => message.clone(),
            other => other.to_string(),
        };
        ErrorBody { error }
    }
}

/// Errors from the hosted completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend is not configured: {0}")]
    NotConfigured(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),
    #[error("backend reported an error: {0}")]
    Upstream(String),
    #[error("stream ended unexpectedly")]
    StreamClosed,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Connection(err.to_string())
        }
    }
}

/// Knowledge-base load failures. Recovered inside the cache and never
/// returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum GroundingLoadError {
    #[error("no knowledge base source configured for {0}")]
    NoSource(Domain),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_error_display() {
        assert_eq!(ChatError::empty_text().to_string(), "validation error: Empty text.");
        assert_eq!(ChatError::Failed("request timed out".into()).to_string(), "request timed out");

        let err = ChatError::from(BackendError::Timeout);
        assert_eq!(err.to_string(), "request timed out");
        assert!(!err.is_client_error());
        assert!(ChatError::empty_text().is_client_error());
    }

    #[test]
    fn error_body_keeps_validation_message_bare() {
        assert_eq!(ErrorBody::from(&ChatError::empty_text()).error, "Empty text.");
        let err = ChatError::from(BackendError::Status {
            status: 500,
            body: "oops".to_string(),
        });
        assert_eq!(ErrorBody::from(&err).error, "backend returned 500: oops");
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::Status {
            status: 429,
            body: "slow down".to_string(),
        };
        assert_eq!(err.to_string(), "backend returned 429: slow down");

        let err = BackendError::MalformedChunk("{oops".to_string());
        assert_eq!(err.to_string(), "malformed stream chunk: {oops");
    }

    #[test]
    fn grounding_error_names_the_domain() {
        let err = GroundingLoadError::NoSource(Domain::Finance);
        assert_eq!(err.to_string(), "no knowledge base source configured for finance");
    }
}
