use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use redstream_transport::{ConnectionConfig, ConnectionFactory, ConnectionHandle, TransportError};

use crate::broker::MemoryBroker;
use crate::connection::MemoryConnection;

/// Opens [`MemoryConnection`]s on a single shared [`MemoryBroker`].
///
/// Every connection is established against the same broker regardless of
/// the URL in the configuration string, which is still parsed so malformed
/// configuration fails the same way it would against a real server.
#[derive(Debug)]
pub struct MemoryConnectionFactory {
    broker: Arc<MemoryBroker>,
    connects: AtomicUsize,
    fail_next: AtomicUsize,
    connect_latency: Duration,
}

impl MemoryConnectionFactory {
    /// Create a factory backed by `broker`.
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            connects: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            connect_latency: Duration::ZERO,
        }
    }

    /// Delay every connect by `latency`.
    #[must_use]
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Make the next `count` connects fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of connect attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The broker connections are opened on.
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

impl Default for MemoryConnectionFactory {
    fn default() -> Self {
        Self::new(MemoryBroker::new())
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self, configuration: &str) -> Result<ConnectionHandle, TransportError> {
        let config = ConnectionConfig::parse(configuration)?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_latency.is_zero() {
            tokio::time::sleep(self.connect_latency).await;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connection(format!(
                "injected connect failure for {}",
                config.url
            )));
        }

        debug!(url = %config.url, "opened memory connection");
        Ok(Arc::new(MemoryConnection::open(Arc::clone(&self.broker))))
    }
}
