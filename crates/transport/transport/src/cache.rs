//! Connection de-duplication.
//!
//! The [`ConnectionCache`] guarantees at most one live connection per
//! configuration string. It is an ordinary value owned by the application's
//! composition root and passed by `Arc` to everything that needs a
//! connection; there is no process-wide static.
//!
//! Creation is double-checked per key: a lock-free read of the slot first,
//! then a per-key async mutex around the re-check and the connect. Unrelated
//! keys never wait on each other.
//!
//! A failed connect leaves the slot empty so a later call can retry, but
//! callers that were already queued behind the failing attempt receive that
//! attempt's error rather than each starting a fresh connect.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionFactory, ConnectionHandle};
use crate::error::TransportError;

#[derive(Default)]
struct Slot {
    handle: OnceLock<ConnectionHandle>,
    creation: tokio::sync::Mutex<()>,
    failed_attempts: AtomicU64,
    last_failure: parking_lot::Mutex<Option<TransportError>>,
    /// Set once `close_all` has taken this slot out of the cache.
    retired: AtomicBool,
}

/// Shares connections keyed by configuration string.
pub struct ConnectionCache {
    factory: Arc<dyn ConnectionFactory>,
    slots: DashMap<String, Arc<Slot>>,
}

impl ConnectionCache {
    /// Create an empty cache that establishes connections with `factory`.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            slots: DashMap::new(),
        }
    }

    /// Return the connection for `configuration`, establishing it on first
    /// use.
    pub async fn acquire(&self, configuration: &str) -> Result<ConnectionHandle, TransportError> {
        loop {
            let slot = self.slot(configuration);
            if !slot.retired.load(Ordering::Acquire) {
                if let Some(handle) = slot.handle.get() {
                    return Ok(Arc::clone(handle));
                }
            }

            let observed_failures = slot.failed_attempts.load(Ordering::Acquire);
            let _creation = slot.creation.lock().await;
            // Removed by `close_all` while this caller waited.
            if slot.retired.load(Ordering::Acquire) {
                continue;
            }
            return self.establish(&slot, configuration, observed_failures).await;
        }
    }

    /// Connect into `slot`. Caller holds the slot's creation lock.
    async fn establish(
        &self,
        slot: &Slot,
        configuration: &str,
        observed_failures: u64,
    ) -> Result<ConnectionHandle, TransportError> {
        if let Some(handle) = slot.handle.get() {
            return Ok(Arc::clone(handle));
        }
        if slot.failed_attempts.load(Ordering::Acquire) != observed_failures {
            if let Some(err) = slot.last_failure.lock().clone() {
                debug!("sharing failure of the connection attempt this caller waited on");
                return Err(err);
            }
        }

        debug!("establishing new shared connection");
        match self.factory.connect(configuration).await {
            Ok(handle) => {
                // Only reachable with the creation lock held and the slot empty.
                let _ = slot.handle.set(Arc::clone(&handle));
                info!(cached = self.slots.len(), "shared connection established");
                Ok(handle)
            }
            Err(err) => {
                *slot.last_failure.lock() = Some(err.clone());
                slot.failed_attempts.fetch_add(1, Ordering::Release);
                warn!(error = %err, "shared connection attempt failed");
                Err(err)
            }
        }
    }

    /// Close every cached connection and empty the cache.
    ///
    /// A connect already in flight is awaited and its connection closed
    /// with the rest. All connections are closed even if some fail; the
    /// first failure is returned. Returns the number of connections closed.
    pub async fn close_all(&self) -> Result<usize, TransportError> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let mut closed = 0;
        let mut first_error = None;

        for (key, slot) in slots {
            let handle = {
                let _creation = slot.creation.lock().await;
                slot.retired.store(true, Ordering::Release);
                self.slots
                    .remove_if(&key, |_, cached| Arc::ptr_eq(cached, &slot));
                slot.handle.get().cloned()
            };
            let Some(handle) = handle else {
                continue;
            };
            match handle.close().await {
                Ok(()) => closed += 1,
                Err(err) => {
                    warn!(error = %err, "failed to close shared connection");
                    first_error.get_or_insert(err);
                }
            }
        }

        info!(closed, "connection cache cleared");
        first_error.map_or(Ok(closed), Err)
    }

    /// Whether an established connection exists for `configuration`.
    pub fn contains(&self, configuration: &str) -> bool {
        self.slots
            .get(configuration)
            .is_some_and(|slot| slot.handle.get().is_some())
    }

    /// Number of established connections.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.handle.get().is_some())
            .count()
    }

    /// Whether no connection has been established.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, configuration: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(configuration) {
            return Arc::clone(&slot);
        }
        Arc::clone(&self.slots.entry(configuration.to_owned()).or_default())
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}
