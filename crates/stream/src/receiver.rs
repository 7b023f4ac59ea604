//! The pull side of one partition.
//!
//! The receiver's manager reference doubles as its terminal marker: shutdown
//! takes it out, and every later call sees `None` and does nothing.
//! Initialization, drains and shutdown pass through one gate, so shutdown
//! never starts while another call is still using the manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, trace};

use redstream_core::QueueId;

use crate::codec::MessageCodec;
use crate::container::BatchContainer;
use crate::error::{Operation, QueueError};
use crate::manager::QueueDataManager;
use crate::timeout::with_deadline;

/// Lifecycle of a [`QueueReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverState {
    Created = 0,
    Initializing = 1,
    Active = 2,
    ShuttingDown = 3,
    /// Terminal.
    Shutdown = 4,
}

impl ReceiverState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Initializing,
            2 => Self::Active,
            3 => Self::ShuttingDown,
            _ => Self::Shutdown,
        }
    }
}

/// Drains one partition's manager and decodes what it buffered.
pub struct QueueReceiver {
    queue_id: QueueId,
    manager: RwLock<Option<Arc<dyn QueueDataManager>>>,
    codec: Arc<dyn MessageCodec>,
    gate: tokio::sync::Mutex<()>,
    last_read_message: AtomicI64,
    state: AtomicU8,
}

impl QueueReceiver {
    pub fn new(
        queue_id: QueueId,
        manager: Arc<dyn QueueDataManager>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        Self {
            queue_id,
            manager: RwLock::new(Some(manager)),
            codec,
            gate: tokio::sync::Mutex::new(()),
            last_read_message: AtomicI64::new(0),
            state: AtomicU8::new(ReceiverState::Created as u8),
        }
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn state(&self) -> ReceiverState {
        ReceiverState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ReceiverState, to: ReceiverState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn snapshot(&self) -> Option<Arc<dyn QueueDataManager>> {
        self.manager.read().clone()
    }

    /// Connect and subscribe, bounded by `timeout`.
    ///
    /// A no-op once the receiver has been shut down. On failure or timeout
    /// the receiver returns to `Created` and may be initialized again.
    #[instrument(skip(self), fields(queue = %self.queue_id))]
    pub async fn initialize(&self, timeout: Duration) -> Result<(), QueueError> {
        let _gate = self.gate.lock().await;
        let Some(manager) = self.snapshot() else {
            debug!("receiver already shut down; initialize ignored");
            return Ok(());
        };
        self.transition(ReceiverState::Created, ReceiverState::Initializing);

        let channel = manager.channel().to_string();
        let result = with_deadline(timeout, Operation::Initialize, &channel, |ct| async move {
            manager.init(&ct).await?;
            manager.subscribe(&ct).await
        })
        .await;

        match &result {
            Ok(()) => {
                if self.transition(ReceiverState::Initializing, ReceiverState::Active) {
                    info!(%channel, "queue receiver active");
                }
            }
            Err(err) => {
                self.transition(ReceiverState::Initializing, ReceiverState::Created);
                error!(%channel, error = %err, "queue receiver failed to initialize");
            }
        }
        result
    }

    /// Drain up to `max_count` buffered messages and decode them.
    ///
    /// Returns an empty list after shutdown. Each decoded batch gets the next
    /// receiver-local sequence number. Payloads that fail to decode are
    /// logged and skipped.
    pub async fn get_messages(&self, max_count: i32) -> Result<Vec<BatchContainer>, QueueError> {
        let _gate = self.gate.lock().await;
        let Some(manager) = self.snapshot() else {
            return Ok(Vec::new());
        };

        let raw = manager.get_messages(max_count);
        let mut batches = Vec::with_capacity(raw.len());
        for payload in raw {
            let sequence = self.last_read_message.fetch_add(1, Ordering::AcqRel);
            match self.codec.decode(&payload, sequence) {
                Ok(batch) => batches.push(batch),
                Err(err) => {
                    error!(
                        queue = %self.queue_id,
                        sequence,
                        error = %err,
                        "dropping undecodable message"
                    );
                }
            }
        }
        Ok(batches)
    }

    /// Acknowledge delivery. Pub/sub keeps nothing to acknowledge.
    pub fn messages_delivered(&self, messages: &[BatchContainer]) {
        trace!(queue = %self.queue_id, count = messages.len(), "messages delivered");
    }

    /// Unsubscribe and release the manager, bounded by `timeout`.
    ///
    /// Waits for an in-flight drain or initialization first. The receiver ends in
    /// [`ReceiverState::Shutdown`] even when the unsubscribe times out or
    /// fails; that error is still returned.
    #[instrument(skip(self), fields(queue = %self.queue_id))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), QueueError> {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != ReceiverState::Shutdown as u8).then_some(ReceiverState::ShuttingDown as u8)
            });
        let _gate = self.gate.lock().await;
        let manager = self.manager.write().take();

        let result = match manager {
            Some(manager) => {
                let channel = manager.channel().to_string();
                with_deadline(timeout, Operation::Shutdown, &channel, |ct| async move {
                    manager.unsubscribe(&ct).await
                })
                .await
            }
            None => Ok(()),
        };

        self.state
            .store(ReceiverState::Shutdown as u8, Ordering::Release);
        match &result {
            Ok(()) => info!("queue receiver shut down"),
            Err(err) => error!(error = %err, "queue receiver shut down uncleanly"),
        }
        result
    }
}

impl std::fmt::Debug for QueueReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueReceiver")
            .field("queue_id", &self.queue_id)
            .field("state", &self.state())
            .field("last_read_message", &self.last_read_message.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use redstream_core::{RequestContext, StreamId, StreamNamespace};

    use super::*;
    use crate::channel::{ChannelName, NameBounds};
    use crate::codec::JsonCodec;
    use crate::manager::UNLIMITED_MESSAGE_COUNT;

    /// Manager double: records calls, serves queued payloads, and can stall
    /// lifecycle calls until cancelled.
    struct ScriptedManager {
        channel: ChannelName,
        pending: Mutex<Vec<Bytes>>,
        stall: bool,
        calls: Mutex<Vec<&'static str>>,
        drains: AtomicUsize,
    }

    impl ScriptedManager {
        fn new(stall: bool) -> Arc<Self> {
            Arc::new(Self {
                channel: ChannelName::new("svc", "events-0", NameBounds::STANDARD).unwrap(),
                pending: Mutex::new(Vec::new()),
                stall,
                calls: Mutex::new(Vec::new()),
                drains: AtomicUsize::new(0),
            })
        }

        fn enqueue(&self, payload: Bytes) {
            self.pending.lock().push(payload);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }

        async fn lifecycle(
            &self,
            name: &'static str,
            operation: Operation,
            ct: &CancellationToken,
        ) -> Result<(), QueueError> {
            self.calls.lock().push(name);
            if self.stall {
                ct.cancelled().await;
            }
            if ct.is_cancelled() {
                return Err(QueueError::Cancelled {
                    operation,
                    channel: self.channel.to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl QueueDataManager for ScriptedManager {
        fn queue_name(&self) -> &str {
            "events-0"
        }
        fn channel(&self) -> &ChannelName {
            &self.channel
        }
        async fn init(&self, ct: &CancellationToken) -> Result<(), QueueError> {
            self.lifecycle("init", Operation::Init, ct).await
        }
        async fn subscribe(&self, ct: &CancellationToken) -> Result<(), QueueError> {
            self.lifecycle("subscribe", Operation::Subscribe, ct).await
        }
        async fn unsubscribe(&self, ct: &CancellationToken) -> Result<(), QueueError> {
            self.lifecycle("unsubscribe", Operation::Unsubscribe, ct).await
        }
        async fn stop(&self, ct: &CancellationToken) -> Result<(), QueueError> {
            self.lifecycle("stop", Operation::Stop, ct).await
        }
        fn get_messages(&self, max_count: i32) -> Vec<Bytes> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            let mut pending = self.pending.lock();
            let take = usize::try_from(max_count).map_or(pending.len(), |m| m.min(pending.len()));
            pending.drain(..take).collect()
        }
        async fn publish(&self, payload: Bytes) -> Result<(), QueueError> {
            self.enqueue(payload);
            Ok(())
        }
        async fn delete_message(&self, _: &Bytes) -> Result<(), QueueError> {
            Ok(())
        }
    }

    fn encoded(n: u32) -> Bytes {
        JsonCodec
            .encode(
                &StreamId::random(),
                &StreamNamespace::new("ns"),
                &[json!(n)],
                &RequestContext::new(),
            )
            .unwrap()
    }

    fn receiver(manager: &Arc<ScriptedManager>) -> QueueReceiver {
        QueueReceiver::new(
            redstream_core::QueueId::new("events", 0, 0),
            Arc::clone(manager) as Arc<dyn QueueDataManager>,
            Arc::new(JsonCodec),
        )
    }

    #[tokio::test]
    async fn initialize_runs_init_then_subscribe() {
        let manager = ScriptedManager::new(false);
        let receiver = receiver(&manager);

        receiver.initialize(Duration::from_secs(1)).await.unwrap();

        assert_eq!(manager.calls(), vec!["init", "subscribe"]);
        assert_eq!(receiver.state(), ReceiverState::Active);
    }

    #[tokio::test]
    async fn zero_timeout_initialize_is_cancelled() {
        let manager = ScriptedManager::new(false);
        let receiver = receiver(&manager);

        let err = receiver.initialize(Duration::ZERO).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(receiver.state(), ReceiverState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_initialize_times_out_and_can_retry() {
        let manager = ScriptedManager::new(true);
        let receiver = receiver(&manager);

        let err = receiver
            .initialize(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.operation(), Some(Operation::Initialize));
        assert_eq!(receiver.state(), ReceiverState::Created);
    }

    #[tokio::test]
    async fn drained_batches_get_increasing_sequence_numbers() {
        let manager = ScriptedManager::new(false);
        let receiver = receiver(&manager);
        for n in 0..3 {
            manager.enqueue(encoded(n));
        }

        let first = receiver.get_messages(2).await.unwrap();
        let second = receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap();

        let sequences: Vec<i64> = first
            .iter()
            .chain(&second)
            .map(|b| b.sequence_token().sequence_number)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_payloads_are_skipped() {
        let manager = ScriptedManager::new(false);
        let receiver = receiver(&manager);
        manager.enqueue(Bytes::from_static(b"garbage"));
        manager.enqueue(encoded(1));

        let batches = receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].sequence_token().sequence_number, 1);
    }

    #[tokio::test]
    async fn shutdown_unsubscribes_and_is_final() {
        let manager = ScriptedManager::new(false);
        let receiver = receiver(&manager);
        receiver.initialize(Duration::from_secs(1)).await.unwrap();
        manager.enqueue(encoded(1));

        receiver.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(receiver.state(), ReceiverState::Shutdown);
        assert_eq!(manager.calls(), vec!["init", "subscribe", "unsubscribe"]);
        assert!(receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap().is_empty());
        assert_eq!(manager.drains.load(Ordering::SeqCst), 0);

        // Late lifecycle calls never reach the manager.
        receiver.initialize(Duration::from_secs(1)).await.unwrap();
        receiver.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(manager.calls().len(), 3);
        assert_eq!(receiver.state(), ReceiverState::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_completes_even_when_unsubscribe_times_out() {
        let manager = ScriptedManager::new(true);
        let receiver = receiver(&manager);

        let err = receiver
            .shutdown(Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(receiver.state(), ReceiverState::Shutdown);
        assert!(receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap().is_empty());
        assert_eq!(manager.drains.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn messages_delivered_is_a_no_op() {
        let manager = ScriptedManager::new(false);
        let receiver = receiver(&manager);
        manager.enqueue(encoded(1));
        let batches = receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap();
        receiver.messages_delivered(&batches);
        assert!(manager.calls().is_empty());
    }
}
