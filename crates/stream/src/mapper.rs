use redstream_core::{QueueId, StreamId};

use crate::error::QueueError;
use crate::options::HashRingMapperOptions;

/// Assigns streams to partitions.
///
/// Implementations must be pure: producers and consumers deployed
/// independently rely on computing the same partition for the same stream.
pub trait StreamQueueMapper: Send + Sync {
    /// Every partition, in ring order.
    fn all_queues(&self) -> &[QueueId];

    /// The partition that owns `(stream_id, namespace)`.
    fn queue_for_stream(&self, stream_id: &StreamId, namespace: &str) -> QueueId;
}

/// A fixed ring of evenly spaced partitions.
///
/// Partition `i` of `n` owns ring position `i * (u32::MAX / n)`. A stream is
/// placed at its uniform hash and belongs to the first partition at or after
/// that position, wrapping to partition 0.
#[derive(Debug, Clone)]
pub struct HashRingQueueMapper {
    ring: Vec<QueueId>,
}

impl HashRingQueueMapper {
    /// Build the ring. Partition ids are prefixed with the lower-cased
    /// `provider` name.
    pub fn new(options: &HashRingMapperOptions, provider: &str) -> Result<Self, QueueError> {
        options.validate(provider)?;
        let count = options.total_queue_count;
        let portion = u32::MAX / count;
        let ring = (0..count)
            .map(|i| QueueId::new(provider, i, portion * i))
            .collect();
        Ok(Self { ring })
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Always `false`: a ring has at least one partition.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl StreamQueueMapper for HashRingQueueMapper {
    fn all_queues(&self) -> &[QueueId] {
        &self.ring
    }

    fn queue_for_stream(&self, stream_id: &StreamId, namespace: &str) -> QueueId {
        let hash = stream_id.uniform_hash(namespace);
        let index = self.ring.partition_point(|q| q.uniform_hash() < hash);
        let owner = self.ring.get(index).unwrap_or(&self.ring[0]);
        owner.clone()
    }
}
