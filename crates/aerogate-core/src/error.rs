//! Error taxonomy shared by all asynchronous operations.

use thiserror::Error;

/// Errors surfaced by SDK operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or service failure. The original cause is preserved as text
    /// so it survives crossing scheduler boundaries.
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Token acquisition or refresh failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A required field was missing or invalid.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Programmer error; unreachable when the state machine's own guards hold.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// A duplicate step request was dropped because one was already in flight.
    /// Not a true failure.
    #[error("request suppressed: {0} already in flight")]
    Suppressed(&'static str),
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_caused_by<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Transport {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// True for errors that represent a dropped duplicate rather than a failure.
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Error::Suppressed(_))
    }
}
