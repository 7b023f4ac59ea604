//! Queue emulation over pub/sub.
//!
//! Pub/sub has no persistence, no backpressure and no delivery guarantees.
//! This crate layers a partitioned, poll-based queue on top of it:
//!
//! - [`HashRingQueueMapper`] assigns every stream to one of a fixed number of
//!   partitions.
//! - [`ChannelQueueManager`] owns the channel for one partition, buffers
//!   inbound messages in a [`BoundedBuffer`] that drops the oldest entries on
//!   overflow, and publishes outbound ones.
//! - [`QueueAdapter`] routes outgoing batches to the right manager.
//! - [`QueueReceiver`] is the pull side of one partition.
//!
//! Delivery is at-most-once and unordered across producers.

pub mod adapter;
pub mod buffer;
pub mod channel;
pub mod codec;
pub mod container;
pub mod error;
pub mod factory;
pub mod manager;
pub mod mapper;
pub mod options;
pub mod receiver;
mod timeout;

pub use adapter::{Direction, QueueAdapter, QueueAdapterBuilder};
pub use buffer::{BoundedBuffer, OverflowStats};
pub use channel::{ChannelName, NameBounds};
pub use codec::{JsonCodec, MessageCodec};
pub use container::BatchContainer;
pub use error::{CodecError, Operation, QueueError};
pub use factory::QueueAdapterFactory;
pub use manager::{ChannelQueueManager, ManagerState, QueueDataManager, UNLIMITED_MESSAGE_COUNT};
pub use mapper::{HashRingQueueMapper, StreamQueueMapper};
pub use options::{ChannelNameProfile, HashRingMapperOptions, OverflowWarning, StreamOptions};
pub use receiver::{QueueReceiver, ReceiverState};
