use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use redstream_core::{
    ProviderName, QueueId, RequestContext, SequenceToken, ServiceId, StreamId, StreamNamespace,
};
use redstream_transport::ConnectionCache;

use crate::codec::MessageCodec;
use crate::error::{CodecError, Operation, QueueError};
use crate::manager::{ChannelQueueManager, QueueDataManager};
use crate::mapper::StreamQueueMapper;
use crate::options::StreamOptions;
use crate::receiver::QueueReceiver;
use crate::timeout::with_deadline;

/// Which roles an adapter serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

type ManagerSlot = Arc<OnceCell<Arc<ChannelQueueManager>>>;

/// Routes outgoing batches to per-partition channel managers and creates
/// receivers.
///
/// Send-side managers are created on first use of a partition and kept for
/// the adapter's lifetime. Receivers get managers of their own.
pub struct QueueAdapter {
    name: ProviderName,
    service_id: ServiceId,
    options: StreamOptions,
    cache: Arc<ConnectionCache>,
    codec: Arc<dyn MessageCodec>,
    mapper: Arc<dyn StreamQueueMapper>,
    managers: DashMap<QueueId, ManagerSlot>,
}

impl QueueAdapter {
    pub fn builder() -> QueueAdapterBuilder {
        QueueAdapterBuilder::default()
    }

    /// The provider name.
    pub fn name(&self) -> &ProviderName {
        &self.name
    }

    /// Always `false`: pub/sub cannot replay from a position.
    pub fn is_rewindable(&self) -> bool {
        false
    }

    pub fn direction(&self) -> Direction {
        Direction::ReadWrite
    }

    pub fn mapper(&self) -> &Arc<dyn StreamQueueMapper> {
        &self.mapper
    }

    /// Number of send-side managers created so far.
    pub fn cached_managers(&self) -> usize {
        self.managers.iter().filter(|e| e.value().initialized()).count()
    }

    /// Encode `events` and publish them on the partition that owns
    /// `(stream_id, namespace)`.
    ///
    /// `token` must be `None`: this queue cannot honour caller-supplied
    /// positions.
    #[instrument(
        skip_all,
        fields(provider = %self.name, stream = %stream_id, namespace = %namespace)
    )]
    pub async fn send_batch<T: Serialize + Sync>(
        &self,
        stream_id: &StreamId,
        namespace: &StreamNamespace,
        events: &[T],
        token: Option<SequenceToken>,
        request_context: &RequestContext,
    ) -> Result<(), QueueError> {
        if token.is_some() {
            return Err(QueueError::SequenceTokenNotSupported);
        }

        let queue_id = self.mapper.queue_for_stream(stream_id, namespace);
        let manager = self.manager_for(&queue_id).await?;

        let events = events
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        let payload = self
            .codec
            .encode(stream_id, namespace, &events, request_context)?;

        debug!(queue = %queue_id, events = events.len(), "sending batch");
        manager.publish(payload).await
    }

    /// Create the receiver for `queue_id`, bound to a fresh manager.
    pub fn create_receiver(&self, queue_id: &QueueId) -> Result<QueueReceiver, QueueError> {
        let manager = ChannelQueueManager::new(
            queue_id,
            &self.service_id,
            &self.options,
            Arc::clone(&self.cache),
        )?;
        info!(provider = %self.name, queue = %queue_id, "created queue receiver");
        Ok(QueueReceiver::new(
            queue_id.clone(),
            Arc::new(manager),
            Arc::clone(&self.codec),
        ))
    }

    /// The send-side manager for `queue_id`, created and initialized
    /// exactly once even under concurrent first use.
    async fn manager_for(&self, queue_id: &QueueId) -> Result<Arc<ChannelQueueManager>, QueueError> {
        let slot = Arc::clone(&self.managers.entry(queue_id.clone()).or_default());
        let manager = slot
            .get_or_try_init(|| async {
                let manager = Arc::new(ChannelQueueManager::new(
                    queue_id,
                    &self.service_id,
                    &self.options,
                    Arc::clone(&self.cache),
                )?);
                let channel = manager.channel().to_string();
                with_deadline(
                    self.options.operation_timeout(),
                    Operation::Init,
                    &channel,
                    |ct| {
                        let manager = Arc::clone(&manager);
                        async move { manager.init(&ct).await }
                    },
                )
                .await?;
                debug!(queue = %queue_id, %channel, "created send-side queue manager");
                Ok::<_, QueueError>(manager)
            })
            .await?;
        Ok(Arc::clone(manager))
    }
}

impl std::fmt::Debug for QueueAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAdapter")
            .field("name", &self.name)
            .field("service_id", &self.service_id)
            .field("options", &self.options)
            .field("managers", &self.managers.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`QueueAdapter`]. Every dependency is required.
#[derive(Default)]
pub struct QueueAdapterBuilder {
    name: Option<ProviderName>,
    service_id: Option<ServiceId>,
    options: Option<StreamOptions>,
    cache: Option<Arc<ConnectionCache>>,
    codec: Option<Arc<dyn MessageCodec>>,
    mapper: Option<Arc<dyn StreamQueueMapper>>,
}

impl QueueAdapterBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<ProviderName>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn service_id(mut self, service_id: impl Into<ServiceId>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: StreamOptions) -> Self {
        self.options = Some(options);
        self
    }

    #[must_use]
    pub fn connection_cache(mut self, cache: Arc<ConnectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    #[must_use]
    pub fn mapper(mut self, mapper: Arc<dyn StreamQueueMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Validate and assemble the adapter.
    ///
    /// Fails with [`QueueError::MissingArgument`] naming the first absent
    /// dependency, or [`QueueError::Configuration`] for invalid options.
    pub fn build(self) -> Result<QueueAdapter, QueueError> {
        let name = self.name.ok_or(QueueError::MissingArgument("name"))?;
        let service_id = self
            .service_id
            .ok_or(QueueError::MissingArgument("service_id"))?;
        let options = self.options.ok_or(QueueError::MissingArgument("options"))?;
        let cache = self
            .cache
            .ok_or(QueueError::MissingArgument("connection_cache"))?;
        let codec = self.codec.ok_or(QueueError::MissingArgument("codec"))?;
        let mapper = self.mapper.ok_or(QueueError::MissingArgument("mapper"))?;

        if name.is_empty() {
            return Err(QueueError::MissingArgument("name"));
        }
        if service_id.is_empty() {
            return Err(QueueError::MissingArgument("service_id"));
        }
        options.validate(&name)?;

        Ok(QueueAdapter {
            name,
            service_id,
            options,
            cache,
            codec,
            mapper,
            managers: DashMap::new(),
        })
    }
}
