//! The per-partition channel manager.
//!
//! A [`ChannelQueueManager`] owns one pub/sub channel. Its subscription
//! callback pushes every inbound payload into a [`BoundedBuffer`]; the
//! receiver drains that buffer on poll. The connection it uses belongs to the
//! [`ConnectionCache`] and is never closed here.
//!
//! Every lifecycle operation takes a [`CancellationToken`], checks it on entry
//! and again after the transport call completes, and abandons the transport
//! call as soon as the token fires.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use redstream_core::{QueueId, ServiceId};
use redstream_transport::{
    ConnectionCache, ConnectionHandle, MessageHandler, SubscriptionId, TransportError,
};

use crate::buffer::{BoundedBuffer, OverflowStats};
use crate::channel::ChannelName;
use crate::error::{Operation, QueueError};
use crate::options::StreamOptions;

/// Pass as `max_count` to drain the whole buffer.
pub const UNLIMITED_MESSAGE_COUNT: i32 = -1;

/// Lifecycle of a [`ChannelQueueManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unstarted,
    Initialized,
    Subscribed,
    Unsubscribed,
    /// Terminal.
    Stopped,
}

/// The queue-manager contract the receiver and adapter are written against.
#[async_trait]
pub trait QueueDataManager: Send + Sync {
    /// The partition this manager serves.
    fn queue_name(&self) -> &str;

    fn channel(&self) -> &ChannelName;

    /// Acquire the shared connection. Repeat calls reuse it.
    async fn init(&self, ct: &CancellationToken) -> Result<(), QueueError>;

    /// Start buffering inbound messages. Repeat calls are no-ops.
    async fn subscribe(&self, ct: &CancellationToken) -> Result<(), QueueError>;

    /// Stop buffering inbound messages. The connection stays open.
    async fn unsubscribe(&self, ct: &CancellationToken) -> Result<(), QueueError>;

    /// Unsubscribe, discard buffered messages and refuse further lifecycle
    /// calls.
    async fn stop(&self, ct: &CancellationToken) -> Result<(), QueueError>;

    /// Remove up to `max_count` buffered messages oldest-first; a negative
    /// count drains everything. Never waits.
    fn get_messages(&self, max_count: i32) -> Vec<Bytes>;

    /// Publish `payload` on the channel. Does not require a subscription.
    async fn publish(&self, payload: Bytes) -> Result<(), QueueError>;

    /// No-op: pub/sub has no selective acknowledgement.
    async fn delete_message(&self, payload: &Bytes) -> Result<(), QueueError>;
}

/// Warns when an operation outlives the configured timeout.
struct SlowAccessGuard<'a> {
    operation: Operation,
    channel: &'a ChannelName,
    threshold: Duration,
    started: Instant,
    slow_count: &'a AtomicU64,
}

impl Drop for SlowAccessGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > self.threshold {
            self.slow_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                channel = %self.channel,
                operation = %self.operation,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                threshold_ms = u64::try_from(self.threshold.as_millis()).unwrap_or(u64::MAX),
                "slow queue operation"
            );
        }
    }
}

/// Owns one channel and its inbound buffer.
pub struct ChannelQueueManager {
    queue_name: String,
    channel: ChannelName,
    configuration: String,
    operation_timeout: Duration,
    cache: Arc<ConnectionCache>,
    connection: OnceLock<ConnectionHandle>,
    buffer: Arc<BoundedBuffer>,
    subscription: Mutex<Option<SubscriptionId>>,
    state: Mutex<ManagerState>,
    /// Serializes subscribe/unsubscribe/stop.
    lifecycle: tokio::sync::Mutex<()>,
    slow_operations: AtomicU64,
}

impl ChannelQueueManager {
    /// Create the manager for `queue_id` within `service_id`.
    ///
    /// Fails if the derived channel name is invalid. No connection is made
    /// until [`init`](QueueDataManager::init).
    pub fn new(
        queue_id: &QueueId,
        service_id: &ServiceId,
        options: &StreamOptions,
        cache: Arc<ConnectionCache>,
    ) -> Result<Self, QueueError> {
        let queue_name = queue_id.to_string();
        let channel = ChannelName::new(
            service_id.as_str(),
            &queue_name,
            options.channel_name_profile.bounds(),
        )?;
        let buffer = BoundedBuffer::new(
            channel.as_str(),
            options.queue_cache_size,
            options.overflow_warning,
        );

        Ok(Self {
            queue_name,
            channel,
            configuration: options.redis.to_config_string(),
            operation_timeout: options.operation_timeout(),
            cache,
            connection: OnceLock::new(),
            buffer: Arc::new(buffer),
            subscription: Mutex::new(None),
            state: Mutex::new(ManagerState::Unstarted),
            lifecycle: tokio::sync::Mutex::new(()),
            slow_operations: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    /// Number of buffered inbound messages.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn overflow_stats(&self) -> OverflowStats {
        self.buffer.overflow_stats()
    }

    /// Operations that exceeded the operation timeout so far.
    pub fn slow_operations(&self) -> u64 {
        self.slow_operations.load(Ordering::Relaxed)
    }

    fn watch(&self, operation: Operation) -> SlowAccessGuard<'_> {
        SlowAccessGuard {
            operation,
            channel: &self.channel,
            threshold: self.operation_timeout,
            started: Instant::now(),
            slow_count: &self.slow_operations,
        }
    }

    fn cancelled(&self, operation: Operation) -> QueueError {
        debug!(channel = %self.channel, %operation, "queue operation cancelled");
        QueueError::Cancelled {
            operation,
            channel: self.channel.to_string(),
        }
    }

    fn check(&self, operation: Operation, ct: &CancellationToken) -> Result<(), QueueError> {
        if ct.is_cancelled() {
            return Err(self.cancelled(operation));
        }
        Ok(())
    }

    fn ensure_running(&self, operation: Operation) -> Result<(), QueueError> {
        if self.state() == ManagerState::Stopped {
            return Err(QueueError::Stopped {
                operation,
                channel: self.channel.to_string(),
            });
        }
        Ok(())
    }

    fn connection(&self, operation: Operation) -> Result<ConnectionHandle, QueueError> {
        self.connection
            .get()
            .cloned()
            .ok_or_else(|| QueueError::NotInitialized {
                operation,
                channel: self.channel.to_string(),
            })
    }

    fn transport_failure(&self, operation: Operation, source: TransportError) -> QueueError {
        error!(channel = %self.channel, %operation, error = %source, "queue operation failed");
        QueueError::Transport {
            operation,
            channel: self.channel.to_string(),
            source,
        }
    }

    /// Await a transport call unless `ct` fires first.
    async fn io<T>(
        &self,
        operation: Operation,
        ct: &CancellationToken,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, QueueError> {
        tokio::select! {
            biased;
            () = ct.cancelled() => Err(self.cancelled(operation)),
            result = call => result.map_err(|e| self.transport_failure(operation, e)),
        }
    }

    fn set_state(&self, next: ManagerState) {
        let mut state = self.state.lock();
        if *state != ManagerState::Stopped {
            *state = next;
        }
    }

    async fn detach(
        &self,
        operation: Operation,
        ct: &CancellationToken,
        next: ManagerState,
    ) -> Result<(), QueueError> {
        self.check(operation, ct)?;
        let _slow = self.watch(operation);
        let _lifecycle = self.lifecycle.lock().await;

        let current = *self.subscription.lock();
        if let Some(id) = current {
            let connection = self.connection(operation)?;
            self.io(operation, ct, connection.unsubscribe(self.channel.as_str(), id))
                .await?;
            *self.subscription.lock() = None;
            info!(channel = %self.channel, subscription = %id, "unsubscribed from channel");
        }

        self.set_state(next);
        if next == ManagerState::Stopped {
            self.buffer.clear();
        }
        self.check(operation, ct)
    }
}

#[async_trait]
impl QueueDataManager for ChannelQueueManager {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn channel(&self) -> &ChannelName {
        &self.channel
    }

    #[instrument(skip(self, ct), fields(channel = %self.channel))]
    async fn init(&self, ct: &CancellationToken) -> Result<(), QueueError> {
        self.check(Operation::Init, ct)?;
        self.ensure_running(Operation::Init)?;
        let _slow = self.watch(Operation::Init);

        if self.connection.get().is_none() {
            let handle = self
                .io(Operation::Init, ct, self.cache.acquire(&self.configuration))
                .await?;
            // The cache hands every caller the same handle, so a lost race
            // stores nothing new.
            let _ = self.connection.set(handle);
        }

        {
            let mut state = self.state.lock();
            if *state == ManagerState::Unstarted {
                *state = ManagerState::Initialized;
            }
        }
        debug!("queue manager initialized");
        self.check(Operation::Init, ct)
    }

    #[instrument(skip(self, ct), fields(channel = %self.channel))]
    async fn subscribe(&self, ct: &CancellationToken) -> Result<(), QueueError> {
        self.check(Operation::Subscribe, ct)?;
        self.ensure_running(Operation::Subscribe)?;
        let _slow = self.watch(Operation::Subscribe);
        let _lifecycle = self.lifecycle.lock().await;

        if self.subscription.lock().is_some() {
            return self.check(Operation::Subscribe, ct);
        }

        let connection = self.connection(Operation::Subscribe)?;
        let buffer = Arc::clone(&self.buffer);
        let handler: MessageHandler =
            Arc::new(move |_: &str, payload: Bytes| buffer.push(payload));
        let id = self
            .io(
                Operation::Subscribe,
                ct,
                connection.subscribe(self.channel.as_str(), handler),
            )
            .await?;

        *self.subscription.lock() = Some(id);
        self.set_state(ManagerState::Subscribed);
        info!(subscription = %id, "subscribed to channel");
        self.check(Operation::Subscribe, ct)
    }

    async fn unsubscribe(&self, ct: &CancellationToken) -> Result<(), QueueError> {
        self.detach(Operation::Unsubscribe, ct, ManagerState::Unsubscribed)
            .await
    }

    async fn stop(&self, ct: &CancellationToken) -> Result<(), QueueError> {
        self.detach(Operation::Stop, ct, ManagerState::Stopped)
            .await
    }

    fn get_messages(&self, max_count: i32) -> Vec<Bytes> {
        let max = usize::try_from(max_count).ok();
        let messages = self.buffer.drain(max);
        trace!(channel = %self.channel, count = messages.len(), "drained buffered messages");
        messages
    }

    #[instrument(skip(self, payload), fields(channel = %self.channel, bytes = payload.len()))]
    async fn publish(&self, payload: Bytes) -> Result<(), QueueError> {
        self.ensure_running(Operation::Publish)?;
        let _slow = self.watch(Operation::Publish);
        let connection = self.connection(Operation::Publish)?;
        let receivers = connection
            .publish(self.channel.as_str(), payload)
            .await
            .map_err(|e| self.transport_failure(Operation::Publish, e))?;
        trace!(receivers, "published message");
        Ok(())
    }

    async fn delete_message(&self, _payload: &Bytes) -> Result<(), QueueError> {
        Ok(())
    }
}

impl std::fmt::Debug for ChannelQueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelQueueManager")
            .field("queue_name", &self.queue_name)
            .field("channel", &self.channel)
            .field("state", &self.state())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// A manager dropped while still subscribed, for instance after an
/// unsubscribe was abandoned on timeout, releases its handler in the
/// background so the shared connection stops feeding its buffer.
impl Drop for ChannelQueueManager {
    fn drop(&mut self) {
        let Some(id) = self.subscription.get_mut().take() else {
            return;
        };
        let Some(connection) = self.connection.get().cloned() else {
            return;
        };
        let channel = self.channel.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match connection.unsubscribe(&channel, id).await {
                        Ok(()) => debug!(%channel, subscription = %id, "released dropped subscription"),
                        Err(err) => warn!(
                            %channel,
                            subscription = %id,
                            error = %err,
                            "failed to release dropped subscription"
                        ),
                    }
                });
            }
            Err(_) => warn!(
                %channel,
                subscription = %id,
                "no runtime to release dropped subscription"
            ),
        }
    }
}
