use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use redstream_core::{RequestContext, SequenceToken, StreamId, StreamNamespace};

use crate::error::CodecError;

/// One dequeued batch: the events a producer sent together, the request
/// context they were sent under, and the receiver-local position assigned on
/// drain.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchContainer {
    stream_id: StreamId,
    namespace: StreamNamespace,
    events: Vec<Value>,
    request_context: RequestContext,
    sequence_token: SequenceToken,
}

impl BatchContainer {
    /// Assemble a batch. `events` must be present, though it may be empty.
    pub fn new(
        stream_id: StreamId,
        namespace: StreamNamespace,
        events: Option<Vec<Value>>,
        request_context: RequestContext,
        sequence_token: SequenceToken,
    ) -> Result<Self, CodecError> {
        let events = events.ok_or(CodecError::MissingEvents)?;
        Ok(Self {
            stream_id,
            namespace,
            events,
            request_context,
            sequence_token,
        })
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn namespace(&self) -> &StreamNamespace {
        &self.namespace
    }

    pub fn sequence_token(&self) -> SequenceToken {
        self.sequence_token
    }

    /// Context to import into the consumer's request scope.
    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    /// The raw events.
    pub fn raw_events(&self) -> &[Value] {
        &self.events
    }

    /// Events that deserialize as `T`, each paired with its own token.
    ///
    /// Events of other shapes are skipped; indices count only the events
    /// returned.
    pub fn events<T: DeserializeOwned>(&self) -> Vec<(T, SequenceToken)> {
        self.events
            .iter()
            .filter_map(|event| serde_json::from_value::<T>(event.clone()).ok())
            .enumerate()
            .map(|(i, event)| {
                let index = i32::try_from(i).unwrap_or(i32::MAX);
                (event, self.sequence_token.for_event(index))
            })
            .collect()
    }

    /// Whether any event passes `predicate`.
    pub fn should_deliver(&self, predicate: impl FnMut(&Value) -> bool) -> bool {
        self.events.iter().any(predicate)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Display for BatchContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[BatchContainer:Stream={},#Items={}]",
            self.stream_id,
            self.events.len()
        )
    }
}
