use std::fmt;

use redstream_transport::TransportError;
use thiserror::Error;

/// The queue operation an error or log line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Init,
    Subscribe,
    Unsubscribe,
    Stop,
    Publish,
    Initialize,
    Shutdown,
}

impl Operation {
    /// Lower-case name used in messages and span fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Stop => "stop",
            Self::Publish => "publish",
            Self::Initialize => "initialize",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while turning batches into payloads and back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to encode batch: {0}")]
    Encode(String),

    #[error("failed to decode batch: {0}")]
    Decode(String),

    #[error("batch carries no event list")]
    MissingEvents,
}

/// Errors raised by the queue layer.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A channel name segment or the joined name broke a naming rule.
    #[error("invalid channel name '{name}': {rule}")]
    InvalidChannelName { name: String, rule: String },

    /// A required dependency was not supplied.
    #[error("required argument '{0}' is missing")]
    MissingArgument(&'static str),

    /// Options failed validation.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The caller supplied a sequence token; this queue is not rewindable.
    #[error("argument 'token': this queue does not support caller-supplied sequence tokens")]
    SequenceTokenNotSupported,

    /// The operation's deadline expired or its token was cancelled.
    #[error("{operation} on channel '{channel}' was cancelled")]
    Cancelled { operation: Operation, channel: String },

    /// The transport failed. Never retried internally.
    #[error("{operation} on channel '{channel}' failed: {source}")]
    Transport {
        operation: Operation,
        channel: String,
        source: TransportError,
    },

    /// The manager has no connection yet.
    #[error("{operation} on channel '{channel}' requires init to complete first")]
    NotInitialized { operation: Operation, channel: String },

    /// The manager was stopped and accepts no further lifecycle calls.
    #[error("{operation} on channel '{channel}' rejected: queue manager is stopped")]
    Stopped { operation: Operation, channel: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl QueueError {
    /// Whether this is a timeout or cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether a caller-level retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Transport { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The operation this error is attributed to, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Cancelled { operation, .. }
            | Self::Transport { operation, .. }
            | Self::NotInitialized { operation, .. }
            | Self::Stopped { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn transport_error_carries_context() {
        let err = QueueError::Transport {
            operation: Operation::Subscribe,
            channel: "svc:q-0".into(),
            source: TransportError::Connection("reset".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("subscribe"));
        assert!(msg.contains("svc:q-0"));
        assert!(msg.contains("reset"));
        assert!(err.source().is_some());
        assert!(err.is_retryable());
        assert!(!err.is_cancelled());
        assert_eq!(err.operation(), Some(Operation::Subscribe));
    }

    #[test]
    fn cancellation_is_distinguishable() {
        let err = QueueError::Cancelled {
            operation: Operation::Init,
            channel: "svc:q-0".into(),
        };
        assert!(err.is_cancelled());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "init on channel 'svc:q-0' was cancelled");
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        assert!(!QueueError::Configuration("x".into()).is_retryable());
        assert!(!QueueError::MissingArgument("codec").is_retryable());
        assert!(!QueueError::SequenceTokenNotSupported.is_retryable());
        assert!(
            QueueError::MissingArgument("codec")
                .to_string()
                .contains("'codec'")
        );
    }

    #[test]
    fn codec_error_converts() {
        let err: QueueError = CodecError::MissingEvents.into();
        assert!(matches!(err, QueueError::Codec(CodecError::MissingEvents)));
        assert_eq!(err.operation(), None);
    }
}
