use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

use crate::connection::{MessageHandler, SubscriptionId};

/// Per-connection table of channel handlers.
///
/// Backends keep one registry per connection: the server only needs a single
/// `SUBSCRIBE` per channel no matter how many handlers are attached, so
/// [`add`](Self::add) and [`remove`](Self::remove) report when the first
/// handler arrives and the last one leaves.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    channels: DashMap<String, Vec<(SubscriptionId, MessageHandler)>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns its id and whether it is the first handler
    /// on the channel.
    pub fn add(&self, channel: &str, handler: MessageHandler) -> (SubscriptionId, bool) {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut handlers = self.channels.entry(channel.to_owned()).or_default();
        let first = handlers.is_empty();
        handlers.push((id, handler));
        (id, first)
    }

    /// Remove a handler. Returns `None` if it was not registered, otherwise
    /// whether the channel has no handlers left.
    pub fn remove(&self, channel: &str, id: SubscriptionId) -> Option<bool> {
        let mut handlers = self.channels.get_mut(channel)?;
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        if handlers.len() == before {
            return None;
        }
        let last = handlers.is_empty();
        drop(handlers);
        if last {
            self.channels.remove_if(channel, |_, h| h.is_empty());
        }
        Some(last)
    }

    /// Deliver a payload to every handler on `channel`. Returns the number of
    /// handlers invoked.
    ///
    /// Handlers are called after the shard lock is released, so a handler
    /// may itself touch the registry.
    pub fn dispatch(&self, channel: &str, payload: &Bytes) -> usize {
        let handlers: Vec<MessageHandler> = match self.channels.get(channel) {
            Some(entry) => entry.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(channel, payload.clone());
        }
        handlers.len()
    }

    /// Number of handlers on `channel`.
    pub fn handler_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |h| h.len())
    }

    /// Channels with at least one handler.
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.channels.clear();
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}
