use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use redstream_core::{RequestContext, SequenceToken, StreamId, StreamNamespace};

use crate::container::BatchContainer;
use crate::error::CodecError;

/// Turns a batch into an opaque payload and back.
///
/// The queue layer never looks inside a payload, so codecs can be swapped
/// without changing queue semantics.
pub trait MessageCodec: Send + Sync {
    fn encode(
        &self,
        stream_id: &StreamId,
        namespace: &StreamNamespace,
        events: &[Value],
        request_context: &RequestContext,
    ) -> Result<Bytes, CodecError>;

    /// Decode `payload`, stamping the batch with `sequence` as its position.
    fn decode(&self, payload: &[u8], sequence: i64) -> Result<BatchContainer, CodecError>;
}

#[derive(Serialize)]
struct WireBatchRef<'a> {
    stream_id: &'a StreamId,
    namespace: &'a StreamNamespace,
    events: &'a [Value],
    #[serde(skip_serializing_if = "RequestContext::is_empty")]
    request_context: &'a RequestContext,
}

#[derive(Deserialize)]
struct WireBatch {
    stream_id: StreamId,
    namespace: StreamNamespace,
    events: Option<Vec<Value>>,
    #[serde(default)]
    request_context: RequestContext,
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for JsonCodec {
    fn encode(
        &self,
        stream_id: &StreamId,
        namespace: &StreamNamespace,
        events: &[Value],
        request_context: &RequestContext,
    ) -> Result<Bytes, CodecError> {
        let wire = WireBatchRef {
            stream_id,
            namespace,
            events,
            request_context,
        };
        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, payload: &[u8], sequence: i64) -> Result<BatchContainer, CodecError> {
        let wire: WireBatch =
            serde_json::from_slice(payload).map_err(|e| CodecError::Decode(e.to_string()))?;
        BatchContainer::new(
            wire.stream_id,
            wire.namespace,
            wire.events,
            wire.request_context,
            SequenceToken::new(sequence),
        )
    }
}
