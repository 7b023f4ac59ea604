use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use redstream_transport::{SubscriptionRegistry, TransportError};

/// The shared "server" every [`MemoryConnection`](crate::MemoryConnection)
/// talks to.
///
/// Publishing on any connection dispatches synchronously to the handlers of
/// every open connection on the same broker, so a message is visible to all
/// subscribers by the time `publish` returns.
#[derive(Default)]
pub struct MemoryBroker {
    next_peer: AtomicU64,
    peers: DashMap<u64, Arc<SubscriptionRegistry>>,
    values: DashMap<String, Bytes>,
    offline: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every operation fail with a connection error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of stored values.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn attach(&self, registry: Arc<SubscriptionRegistry>) -> u64 {
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        self.peers.insert(id, registry);
        id
    }

    pub(crate) fn detach(&self, peer: u64) {
        self.peers.remove(&peer);
    }

    /// Apply injected latency, then fail if the broker is offline.
    pub(crate) async fn round_trip(&self) -> Result<(), TransportError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("memory broker is offline".into()));
        }
        Ok(())
    }

    pub(crate) fn publish(&self, channel: &str, payload: &Bytes) -> u64 {
        let registries: Vec<Arc<SubscriptionRegistry>> =
            self.peers.iter().map(|e| Arc::clone(e.value())).collect();
        let delivered: usize = registries
            .iter()
            .map(|registry| registry.dispatch(channel, payload))
            .sum();
        u64::try_from(delivered).unwrap_or(u64::MAX)
    }

    pub(crate) fn get(&self, key: &str) -> Option<Bytes> {
        self.values.get(key).map(|v| v.clone())
    }

    pub(crate) fn set(&self, key: &str, value: Bytes) {
        self.values.insert(key.to_owned(), value);
    }

    /// The entry lock covers both the comparison and the write.
    pub(crate) fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&Bytes>,
        value: Bytes,
    ) -> bool {
        match (self.values.entry(key.to_owned()), expected) {
            (Entry::Occupied(mut current), Some(expected)) if current.get() == expected => {
                current.insert(value);
                true
            }
            (Entry::Vacant(slot), None) => {
                slot.insert(value);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn delete(&self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("connections", &self.peers.len())
            .field("values", &self.values.len())
            .field("offline", &self.offline.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
