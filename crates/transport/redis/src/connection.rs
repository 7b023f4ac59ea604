use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config, Pool, Runtime};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use redis::Script;
use tracing::debug;

use redstream_transport::{
    Connection, ConnectionConfig, MessageHandler, SubscriptionId, TransportError,
};

use crate::listeners::{Listeners, MessageStream, ReconnectBackoff};
use crate::scripts;

type OpenFuture = BoxFuture<'static, Result<MessageStream, TransportError>>;

/// A Redis server link: a command pool plus one pub/sub listener per
/// subscribed channel.
pub struct RedisConnection {
    client: redis::Client,
    pool: Pool,
    sync_timeout: Duration,
    listeners: Listeners,
    closed: AtomicBool,
}

impl RedisConnection {
    /// Build the pool and verify the server answers.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        let pool = Config::from_url(&config.url)
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.sync_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| TransportError::Configuration(e.to_string()))?
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        let connection = Self {
            client,
            pool,
            sync_timeout: config.sync_timeout,
            listeners: Listeners::new(ReconnectBackoff::default()),
            closed: AtomicBool::new(false),
        };
        connection.ping().await?;
        Ok(connection)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<deadpool_redis::Connection, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.pool
            .get()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Apply the synchronous round-trip timeout to `op`.
    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::time::timeout(self.sync_timeout, op)
            .await
            .map_err(|_| TransportError::Timeout(self.sync_timeout))?
    }

    /// Opens a dedicated pub/sub connection subscribed to `channel`; called
    /// again by the listener whenever the subscription drops.
    fn opener(
        &self,
        channel: &str,
    ) -> impl Fn() -> OpenFuture + Send + Sync + 'static {
        let client = self.client.clone();
        let channel = channel.to_owned();
        let timeout = self.sync_timeout;
        move || open_channel(client.clone(), channel.clone(), timeout).boxed()
    }
}

async fn open_channel(
    client: redis::Client,
    channel: String,
    timeout: Duration,
) -> Result<MessageStream, TransportError> {
    let open = async {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        pubsub
            .subscribe(channel.as_str())
            .await
            .map_err(|e| TransportError::Command(e.to_string()))?;
        let messages = pubsub
            .into_on_message()
            .map(|msg| {
                (
                    msg.get_channel_name().to_owned(),
                    Bytes::copy_from_slice(msg.get_payload_bytes()),
                )
            })
            .boxed();
        Ok::<_, TransportError>(messages)
    };
    tokio::time::timeout(timeout, open)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("listeners", &self.listeners.len())
            .field("sync_timeout", &self.sync_timeout)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, TransportError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload.as_ref())
                .query_async::<u64>(&mut conn)
                .await
                .map_err(|e| TransportError::Command(e.to_string()))
        })
        .await
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.listeners
            .subscribe(channel, handler, self.opener(channel))
            .await
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), TransportError> {
        self.listeners.unsubscribe(channel, id).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            let value: Option<Vec<u8>> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| TransportError::Command(e.to_string()))?;
            Ok(value.map(Bytes::from))
        })
        .await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), TransportError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            redis::cmd("SET")
                .arg(key)
                .arg(value.as_ref())
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| TransportError::Command(e.to_string()))
        })
        .await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Bytes>,
        value: Bytes,
    ) -> Result<bool, TransportError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            let (flag, current): (i64, &[u8]) = match &expected {
                Some(current) => (1, current.as_ref()),
                None => (0, b""),
            };
            let script = Script::new(scripts::COMPARE_AND_SET);
            let written: i64 = script
                .key(key)
                .arg(flag)
                .arg(current)
                .arg(value.as_ref())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| TransportError::Command(e.to_string()))?;
            Ok(written == 1)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, TransportError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            let removed: i64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| TransportError::Command(e.to_string()))?;
            Ok(removed > 0)
        })
        .await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.listeners.close().await;
        self.pool.close();
        debug!("redis connection closed");
        Ok(())
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> ConnectionConfig {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        ConnectionConfig::parse(&url).expect("REDIS_URL should parse")
    }

    #[tokio::test]
    async fn connection_conformance() {
        let conn = RedisConnection::connect(&test_config())
            .await
            .expect("redis should be reachable");
        let prefix = format!("redstream-test-{}", uuid::Uuid::new_v4());
        redstream_transport::testing::run_connection_conformance_tests(&conn, &prefix)
            .await
            .expect("conformance tests should pass");
        conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn closed_connection_rejects_commands() {
        let conn = RedisConnection::connect(&test_config())
            .await
            .expect("redis should be reachable");
        conn.close().await.unwrap();
        assert_eq!(conn.get("any").await, Err(TransportError::Closed));
    }
}
