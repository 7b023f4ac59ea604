use std::sync::Arc;

use tracing::info;

use redstream_core::{ProviderName, ServiceId};
use redstream_transport::ConnectionCache;

use crate::adapter::QueueAdapter;
use crate::codec::MessageCodec;
use crate::error::QueueError;
use crate::mapper::{HashRingQueueMapper, StreamQueueMapper};
use crate::options::{HashRingMapperOptions, StreamOptions};

/// Composition root of one queue provider.
///
/// Validates the options up front, owns the partition ring, and hands out
/// adapters that share it.
pub struct QueueAdapterFactory {
    name: ProviderName,
    service_id: ServiceId,
    options: StreamOptions,
    mapper: Arc<HashRingQueueMapper>,
    cache: Arc<ConnectionCache>,
    codec: Arc<dyn MessageCodec>,
}

impl QueueAdapterFactory {
    pub fn new(
        name: impl Into<ProviderName>,
        options: StreamOptions,
        mapper_options: &HashRingMapperOptions,
        cache: Arc<ConnectionCache>,
        codec: Arc<dyn MessageCodec>,
        service_id: impl Into<ServiceId>,
    ) -> Result<Self, QueueError> {
        let name = name.into();
        let service_id = service_id.into();
        if name.is_empty() {
            return Err(QueueError::MissingArgument("name"));
        }
        if service_id.is_empty() {
            return Err(QueueError::MissingArgument("service_id"));
        }
        options.validate(&name)?;
        let mapper = HashRingQueueMapper::new(mapper_options, &name)?;

        info!(
            provider = %name,
            partitions = mapper.len(),
            cache_size = options.queue_cache_size,
            "queue adapter factory configured"
        );
        Ok(Self {
            name,
            service_id,
            options,
            mapper: Arc::new(mapper),
            cache,
            codec,
        })
    }

    pub fn name(&self) -> &ProviderName {
        &self.name
    }

    /// A new adapter sharing this factory's ring, cache and codec.
    pub fn create_adapter(&self) -> Result<QueueAdapter, QueueError> {
        QueueAdapter::builder()
            .name(self.name.clone())
            .service_id(self.service_id.clone())
            .options(self.options.clone())
            .connection_cache(Arc::clone(&self.cache))
            .codec(Arc::clone(&self.codec))
            .mapper(self.stream_queue_mapper())
            .build()
    }

    pub fn stream_queue_mapper(&self) -> Arc<dyn StreamQueueMapper> {
        Arc::clone(&self.mapper) as Arc<dyn StreamQueueMapper>
    }
}

impl std::fmt::Debug for QueueAdapterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAdapterFactory")
            .field("name", &self.name)
            .field("service_id", &self.service_id)
            .field("options", &self.options)
            .field("partitions", &self.mapper.len())
            .finish_non_exhaustive()
    }
}
