use redstream_transport::TransportError;
use thiserror::Error;

/// Errors raised by grain storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("storage provider '{0}' used before init")]
    NotInitialized(String),

    #[error("{operation} of '{key}' failed: {source}")]
    Transport {
        operation: &'static str,
        key: String,
        source: TransportError,
    },

    #[error("state serialization failed: {0}")]
    Serialization(String),

    /// The caller's ETag does not match the stored state.
    #[error(
        "inconsistent state detected while writing type '{type_name}': stored etag {}, caller etag {}",
        stored.as_deref().unwrap_or("<none>"),
        current.as_deref().unwrap_or("<none>")
    )]
    InconsistentState {
        type_name: String,
        /// `None` when the record vanished under a concurrent clear.
        stored: Option<String>,
        current: Option<String>,
    },
}

impl StorageError {
    /// Whether this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::InconsistentState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_tags() {
        let err = StorageError::InconsistentState {
            type_name: "Counter".into(),
            stored: Some("AAA".into()),
            current: None,
        };
        assert!(err.is_conflict());
        let msg = err.to_string();
        assert!(msg.contains("Counter"));
        assert!(msg.contains("AAA"));
        assert!(msg.contains("<none>"));
    }
}
