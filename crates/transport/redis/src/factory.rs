use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use redstream_transport::{ConnectionConfig, ConnectionFactory, ConnectionHandle, TransportError};

use crate::connection::RedisConnection;

/// Opens [`RedisConnection`]s from configuration strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnectionFactory;

impl RedisConnectionFactory {
    /// Create a factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnectionFactory {
    async fn connect(&self, configuration: &str) -> Result<ConnectionHandle, TransportError> {
        let config = ConnectionConfig::parse(configuration)?;
        let connection = RedisConnection::connect(&config).await?;
        info!(pool_size = config.pool_size, "redis connection established");
        Ok(Arc::new(connection))
    }
}
