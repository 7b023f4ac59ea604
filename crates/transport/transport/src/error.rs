use thiserror::Error;

/// Errors raised by transport backends and the connection cache.
///
/// The type is `Clone` so that a single failed connection attempt can be
/// reported to every caller that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("connection closed")]
    Closed,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl TransportError {
    /// Returns `true` for failures that may succeed if simply tried again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}
