use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Callback invoked for every message delivered on a subscribed channel.
///
/// Handlers run on the transport's dispatch context. They must not block:
/// enqueue the payload somewhere and return.
pub type MessageHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Identifies one handler registration on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One live link to a pub/sub + key/value server.
///
/// Connections are shared between many queue managers and storage providers
/// through the [`ConnectionCache`](crate::ConnectionCache); none of those
/// users owns the connection, so none of them may [`close`](Self::close) it.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Publish `payload` on `channel`. Returns the number of subscribers the
    /// server delivered it to.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, TransportError>;

    /// Register `handler` for messages on `channel`.
    ///
    /// Several handlers may be registered on the same channel; each receives
    /// every message.
    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, TransportError>;

    /// Remove one handler registration. Removing an unknown registration is
    /// not an error.
    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), TransportError>;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), TransportError>;

    /// Write `value` only if the stored value equals `expected`, where
    /// `None` requires the key to be absent. The comparison and the write
    /// are one atomic step on the server. Returns whether the write
    /// happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Bytes>,
        value: Bytes,
    ) -> Result<bool, TransportError>;

    /// Delete a value. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, TransportError>;

    /// Tear the connection down. Only the cache calls this.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Shared handle to a [`Connection`].
pub type ConnectionHandle = Arc<dyn Connection>;

/// Establishes new connections from a configuration string.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Establish a brand-new connection. Implementations never cache.
    async fn connect(&self, configuration: &str) -> Result<ConnectionHandle, TransportError>;
}
