//! Pub/sub listener bookkeeping.
//!
//! A channel has a listener task exactly while it has handlers. The listener
//! is started before the first handler is registered, so a subscribe that is
//! abandoned while the server is still answering leaves nothing behind and a
//! retry starts from scratch.
//!
//! When the server drops a subscription the listener reopens it, backing off
//! between failed attempts, until the last handler leaves.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use redstream_transport::{MessageHandler, SubscriptionId, SubscriptionRegistry, TransportError};

/// `(channel, payload)` pairs delivered by one open subscription.
pub(crate) type MessageStream = BoxStream<'static, (String, Bytes)>;

/// Delay between attempts to reopen a dropped subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReconnectBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl ReconnectBackoff {
    /// Doubles per attempt, capped at `max`.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

pub(crate) struct Listeners {
    registry: Arc<SubscriptionRegistry>,
    tasks: DashMap<String, JoinHandle<()>>,
    /// Serializes listener start/stop so one channel is never opened twice.
    lock: tokio::sync::Mutex<()>,
    backoff: ReconnectBackoff,
}

impl Listeners {
    pub(crate) fn new(backoff: ReconnectBackoff) -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            tasks: DashMap::new(),
            lock: tokio::sync::Mutex::new(()),
            backoff,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_listening(&self, channel: &str) -> bool {
        self.tasks
            .get(channel)
            .is_some_and(|task| !task.is_finished())
    }

    /// Register `handler` on `channel`, opening the subscription with `open`
    /// first if the channel has no running listener.
    pub(crate) async fn subscribe<O, Fut>(
        &self,
        channel: &str,
        handler: MessageHandler,
        open: O,
    ) -> Result<SubscriptionId, TransportError>
    where
        O: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageStream, TransportError>> + Send + 'static,
    {
        let _guard = self.lock.lock().await;
        if !self.is_listening(channel) {
            let messages = open().await?;
            let task = tokio::spawn(listen(
                channel.to_owned(),
                Arc::clone(&self.registry),
                messages,
                open,
                self.backoff,
            ));
            if let Some(stale) = self.tasks.insert(channel.to_owned(), task) {
                stale.abort();
            }
            debug!(channel, "redis listener started");
        }
        let (id, _) = self.registry.add(channel, handler);
        Ok(id)
    }

    /// Remove one handler; the listener stops with the last one.
    pub(crate) async fn unsubscribe(&self, channel: &str, id: SubscriptionId) {
        let _guard = self.lock.lock().await;
        if self.registry.remove(channel, id) == Some(true) {
            self.stop(channel);
        }
    }

    /// Stop every listener and drop every handler.
    pub(crate) async fn close(&self) {
        let _guard = self.lock.lock().await;
        let channels: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for channel in channels {
            self.stop(&channel);
        }
        self.registry.clear();
    }

    fn stop(&self, channel: &str) {
        // Dropping the task's stream closes its pub/sub connection.
        if let Some((_, task)) = self.tasks.remove(channel) {
            task.abort();
            debug!(channel, "redis listener stopped");
        }
    }
}

async fn listen<O, Fut>(
    channel: String,
    registry: Arc<SubscriptionRegistry>,
    mut messages: MessageStream,
    open: O,
    backoff: ReconnectBackoff,
) where
    O: Fn() -> Fut,
    Fut: Future<Output = Result<MessageStream, TransportError>>,
{
    loop {
        while let Some((name, payload)) = messages.next().await {
            registry.dispatch(&name, &payload);
        }
        warn!(%channel, "redis subscription stream ended; resubscribing");
        messages = reopen(&channel, &open, backoff).await;
    }
}

async fn reopen<O, Fut>(channel: &str, open: &O, backoff: ReconnectBackoff) -> MessageStream
where
    O: Fn() -> Fut,
    Fut: Future<Output = Result<MessageStream, TransportError>>,
{
    let mut attempt = 0u32;
    loop {
        tokio::time::sleep(backoff.delay(attempt)).await;
        match open().await {
            Ok(messages) => {
                info!(channel, attempt, "redis subscription reopened");
                return messages;
            }
            Err(err) => {
                warn!(channel, attempt, error = %err, "failed to reopen redis subscription");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
