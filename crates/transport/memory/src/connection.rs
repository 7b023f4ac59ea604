use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use redstream_transport::{
    Connection, MessageHandler, SubscriptionId, SubscriptionRegistry, TransportError,
};

use crate::broker::MemoryBroker;

/// One connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    peer: u64,
    registry: Arc<SubscriptionRegistry>,
    closed: AtomicBool,
}

impl MemoryConnection {
    /// Open a connection on `broker`.
    pub fn open(broker: Arc<MemoryBroker>) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let peer = broker.attach(Arc::clone(&registry));
        Self {
            broker,
            peer,
            registry,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of handlers this connection holds for `channel`.
    pub fn handler_count(&self, channel: &str) -> usize {
        self.registry.handler_count(channel)
    }

    async fn ready(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.broker.round_trip().await
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, TransportError> {
        self.ready().await?;
        Ok(self.broker.publish(channel, &payload))
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, TransportError> {
        self.ready().await?;
        let (id, first) = self.registry.add(channel, handler);
        debug!(channel, %id, first, "memory subscription added");
        Ok(id)
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), TransportError> {
        self.ready().await?;
        if let Some(last) = self.registry.remove(channel, id) {
            debug!(channel, %id, last, "memory subscription removed");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError> {
        self.ready().await?;
        Ok(self.broker.get(key))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), TransportError> {
        self.ready().await?;
        self.broker.set(key, value);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Bytes>,
        value: Bytes,
    ) -> Result<bool, TransportError> {
        self.ready().await?;
        Ok(self.broker.compare_and_set(key, expected.as_ref(), value))
    }

    async fn delete(&self, key: &str) -> Result<bool, TransportError> {
        self.ready().await?;
        Ok(self.broker.delete(key))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.registry.clear();
            self.broker.detach(self.peer);
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.broker.detach(self.peer);
    }
}
