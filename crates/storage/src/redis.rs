//! Grain storage over a cached connection.
//!
//! Each grain's state lives as one JSON value under
//! [`urn`](crate::key::urn). Writes compare the caller's ETag with the tag of
//! the stored value before replacing it; reads never fail the caller on a
//! transport error, they log and leave the in-memory state as it was.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use redstream_core::{ClusterId, ProviderName, ServiceId};
use redstream_transport::{ConnectionCache, ConnectionHandle, TransportError};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::error::StorageError;
use crate::etag::compute_etag;
use crate::key::{StorageKey, urn};
use crate::options::StorageOptions;
use crate::storage::{GrainState, GrainStorage};

/// [`GrainStorage`] backed by a key/value connection from a
/// [`ConnectionCache`].
pub struct RedisGrainStorage {
    name: ProviderName,
    options: StorageOptions,
    service_id: ServiceId,
    cluster_id: ClusterId,
    configuration: String,
    cache: Arc<ConnectionCache>,
    connection: OnceLock<ConnectionHandle>,
}

impl RedisGrainStorage {
    /// Create a provider. The options are validated here; no connection is
    /// made until [`init`](GrainStorage::init).
    pub fn new(
        name: impl Into<ProviderName>,
        options: StorageOptions,
        service_id: ServiceId,
        cluster_id: ClusterId,
        cache: Arc<ConnectionCache>,
    ) -> Result<Self, StorageError> {
        let name = name.into();
        options.validate(name.as_str())?;
        Ok(Self {
            configuration: options.redis.to_config_string(),
            name,
            options,
            service_id,
            cluster_id,
            cache,
            connection: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &ProviderName {
        &self.name
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// The server-side key for a grain's state of `type_name`.
    pub fn record_key(&self, grain_key: &str, type_name: &str) -> String {
        let key = StorageKey::new(
            &self.name,
            self.options.persistence_lifetime,
            &self.service_id,
            &self.cluster_id,
            grain_key,
        );
        urn(type_name, &key)
    }

    fn connection(&self) -> Result<ConnectionHandle, StorageError> {
        self.connection
            .get()
            .cloned()
            .ok_or_else(|| StorageError::NotInitialized(self.name.to_string()))
    }

    fn transport_failure(
        operation: &'static str,
        key: &str,
        source: TransportError,
    ) -> StorageError {
        StorageError::Transport {
            operation,
            key: key.to_owned(),
            source,
        }
    }

    /// The stored record as raw bytes and as JSON.
    async fn load(
        connection: &ConnectionHandle,
        operation: &'static str,
        key: &str,
    ) -> Result<Option<(Bytes, Value)>, StorageError> {
        let Some(raw) = connection
            .get(key)
            .await
            .map_err(|e| Self::transport_failure(operation, key, e))?
        else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Serialization(format!("stored value at '{key}': {e}")))?;
        Ok(Some((raw, value)))
    }

    fn conflict(key: &str, state: &GrainState, stored: Option<String>) -> StorageError {
        warn!(
            %key,
            stored = ?stored,
            current = ?state.etag,
            "rejecting write with stale etag"
        );
        StorageError::InconsistentState {
            type_name: state.type_name.clone(),
            stored,
            current: state.etag.clone(),
        }
    }
}

impl std::fmt::Debug for RedisGrainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisGrainStorage")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("initialized", &self.connection.get().is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GrainStorage for RedisGrainStorage {
    #[instrument(skip(self), fields(provider = %self.name))]
    async fn init(&self) -> Result<(), StorageError> {
        if self.connection.get().is_some() {
            return Ok(());
        }
        let handle = self
            .cache
            .acquire(&self.configuration)
            .await
            .map_err(|e| {
                error!(error = %e, "grain storage failed to connect");
                Self::transport_failure("init", &self.configuration, e)
            })?;
        let _ = self.connection.set(handle);
        info!(
            lifetime = ?self.options.persistence_lifetime,
            "grain storage initialized"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        debug!(provider = %self.name, "grain storage closed");
        Ok(())
    }

    #[instrument(skip(self, state), fields(provider = %self.name, type_name = %state.type_name))]
    async fn read_state(
        &self,
        grain_key: &str,
        state: &mut GrainState,
    ) -> Result<(), StorageError> {
        let connection = self.connection()?;
        let key = self.record_key(grain_key, &state.type_name);

        match Self::load(&connection, "read", &key).await {
            Ok(Some((_, stored))) => {
                state.etag = Some(compute_etag(&stored));
                state.state = stored;
                debug!(%key, "state read");
            }
            Ok(None) => debug!(%key, "no stored state"),
            Err(err) => error!(%key, error = %err, "failed to read grain state"),
        }
        Ok(())
    }

    #[instrument(skip(self, state), fields(provider = %self.name, type_name = %state.type_name))]
    async fn write_state(
        &self,
        grain_key: &str,
        state: &mut GrainState,
    ) -> Result<(), StorageError> {
        let connection = self.connection()?;
        let key = self.record_key(grain_key, &state.type_name);

        let stored = Self::load(&connection, "write", &key).await?;
        let strict = self.options.fail_on_inconsistent_etag;
        let mut expected = None;
        if let Some((raw, value)) = stored {
            let stored_etag = compute_etag(&value);
            if state.etag.as_deref() != Some(stored_etag.as_str()) {
                if strict {
                    return Err(Self::conflict(&key, state, Some(stored_etag)));
                }
                warn!(
                    %key,
                    stored = %stored_etag,
                    current = ?state.etag,
                    "overwriting state with stale etag"
                );
            }
            expected = Some(raw);
        }

        let payload = Bytes::from(
            serde_json::to_vec(&state.state)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        );
        let write_failed = |e: TransportError| {
            error!(%key, error = %e, "failed to write grain state");
            Self::transport_failure("write", &key, e)
        };

        if strict {
            // Replace exactly the record validated above, or nothing.
            let written = connection
                .compare_and_set(&key, expected, payload)
                .await
                .map_err(write_failed)?;
            if !written {
                let current = Self::load(&connection, "write", &key)
                    .await?
                    .map(|(_, value)| compute_etag(&value));
                return Err(Self::conflict(&key, state, current));
            }
        } else {
            connection.set(&key, payload).await.map_err(write_failed)?;
        }

        state.etag = Some(compute_etag(&state.state));
        debug!(%key, "state written");
        Ok(())
    }

    #[instrument(skip(self, state), fields(provider = %self.name, type_name = %state.type_name))]
    async fn clear_state(
        &self,
        grain_key: &str,
        state: &mut GrainState,
    ) -> Result<(), StorageError> {
        let connection = self.connection()?;
        let key = self.record_key(grain_key, &state.type_name);

        connection.delete(&key).await.map_err(|e| {
            error!(%key, error = %e, "failed to clear grain state");
            Self::transport_failure("clear", &key, e)
        })?;
        state.etag = None;
        debug!(%key, "state cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use redstream_transport::ConnectionFactory;
    use redstream_transport_memory::{MemoryBroker, MemoryConnectionFactory};
    use serde_json::json;

    use super::*;
    use crate::options::PersistenceLifetime;

    struct Fixture {
        broker: Arc<MemoryBroker>,
        cache: Arc<ConnectionCache>,
    }

    impl Fixture {
        fn new() -> Self {
            let broker = MemoryBroker::new();
            let factory = Arc::new(MemoryConnectionFactory::new(Arc::clone(&broker)));
            let cache = Arc::new(ConnectionCache::new(factory as Arc<dyn ConnectionFactory>));
            Self { broker, cache }
        }

        fn storage(&self, options: StorageOptions) -> RedisGrainStorage {
            RedisGrainStorage::new(
                "grains",
                options,
                ServiceId::new("svc"),
                ClusterId::new("blue"),
                Arc::clone(&self.cache),
            )
            .unwrap()
        }

        async fn started(&self, options: StorageOptions) -> RedisGrainStorage {
            let storage = self.storage(options);
            storage.init().await.unwrap();
            storage
        }
    }

    fn options() -> StorageOptions {
        StorageOptions::new("redis://memory")
    }

    #[test]
    fn new_rejects_invalid_options() {
        let fixture = Fixture::new();
        let err = RedisGrainStorage::new(
            "grains",
            StorageOptions::default(),
            ServiceId::new("svc"),
            ClusterId::new("blue"),
            Arc::clone(&fixture.cache),
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn operations_before_init_fail() {
        let fixture = Fixture::new();
        let storage = fixture.storage(options());
        let mut state = GrainState::new("Counter", json!({}));
        assert!(matches!(
            storage.read_state("g", &mut state).await,
            Err(StorageError::NotInitialized(_))
        ));
        assert!(matches!(
            storage.write_state("g", &mut state).await,
            Err(StorageError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn init_shares_the_cached_connection() {
        let fixture = Fixture::new();
        let a = fixture.started(options()).await;
        let b = fixture.started(options()).await;
        a.init().await.unwrap();
        assert_eq!(fixture.cache.len(), 1);
        assert_eq!(fixture.broker.connection_count(), 1);
        b.close().await.unwrap();
        assert_eq!(fixture.broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn read_missing_leaves_state_untouched() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let mut state = GrainState::new("Counter", json!({"count": 0}));

        storage.read_state("g1", &mut state).await.unwrap();

        assert_eq!(state.state, json!({"count": 0}));
        assert!(state.etag.is_none());
    }

    #[tokio::test]
    async fn write_then_read_from_fresh_state() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;

        let mut written = GrainState::new("Counter", json!({"count": 7}));
        storage.write_state("g1", &mut written).await.unwrap();
        let tag = written.etag.clone().unwrap();
        assert_eq!(tag, compute_etag(&json!({"count": 7})));

        let mut read = GrainState::new("Counter", json!({}));
        storage.read_state("g1", &mut read).await.unwrap();
        assert_eq!(read.state, json!({"count": 7}));
        assert_eq!(read.etag.as_deref(), Some(tag.as_str()));
    }

    #[tokio::test]
    async fn record_key_uses_lowercase_type_and_scope() {
        let fixture = Fixture::new();
        let service = fixture.started(options()).await;
        let cluster = fixture
            .started(options().with_persistence_lifetime(PersistenceLifetime::Cluster))
            .await;

        assert_eq!(service.record_key("g1", "Counter"), "urn:counter:grains:svc:g1");
        assert_eq!(cluster.record_key("g1", "Counter"), "urn:counter:grains:blue:g1");

        let mut state = GrainState::new("Counter", json!({"count": 1}));
        service.write_state("g1", &mut state).await.unwrap();

        let connection = fixture
            .cache
            .acquire(&options().redis.to_config_string())
            .await
            .unwrap();
        let raw = connection
            .get("urn:counter:grains:svc:g1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&raw).unwrap(),
            json!({"count": 1})
        );

        // Cluster-scoped state is a different record.
        let mut other = GrainState::new("Counter", json!({}));
        cluster.read_state("g1", &mut other).await.unwrap();
        assert!(other.etag.is_none());
    }

    #[tokio::test]
    async fn type_name_separates_records() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let mut counter = GrainState::new("Counter", json!({"count": 1}));
        storage.write_state("g1", &mut counter).await.unwrap();

        let mut profile = GrainState::new("Profile", json!({}));
        storage.read_state("g1", &mut profile).await.unwrap();
        assert_eq!(profile.state, json!({}));
        assert!(profile.etag.is_none());
    }

    #[tokio::test]
    async fn stale_etag_is_rejected() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;

        let mut first = GrainState::new("Counter", json!({"count": 1}));
        storage.write_state("g1", &mut first).await.unwrap();

        let mut second = GrainState::new("Counter", json!({}));
        storage.read_state("g1", &mut second).await.unwrap();
        second.state = json!({"count": 2});
        storage.write_state("g1", &mut second).await.unwrap();

        // `first` still holds the tag of count=1.
        first.state = json!({"count": 3});
        let err = storage.write_state("g1", &mut first).await.unwrap_err();
        assert!(err.is_conflict());

        let mut check = GrainState::new("Counter", json!({}));
        storage.read_state("g1", &mut check).await.unwrap();
        assert_eq!(check.state, json!({"count": 2}));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_writers_with_same_etag_admit_one() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let mut seed = GrainState::new("Counter", json!({"count": 0}));
        storage.write_state("g1", &mut seed).await.unwrap();
        fixture.broker.set_latency(Duration::from_millis(10));

        let mut a = GrainState {
            state: json!({"count": 1}),
            ..seed.clone()
        };
        let mut b = GrainState {
            state: json!({"count": 2}),
            ..seed.clone()
        };
        let (ra, rb) = tokio::join!(
            storage.write_state("g1", &mut a),
            storage.write_state("g1", &mut b)
        );
        assert!(ra.is_ok() ^ rb.is_ok(), "exactly one writer wins");
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(loser.unwrap_err().is_conflict());

        fixture.broker.set_latency(Duration::ZERO);
        let winner = if a.etag == seed.etag { &b } else { &a };
        let mut check = GrainState::new("Counter", json!({}));
        storage.read_state("g1", &mut check).await.unwrap();
        assert_eq!(check.state, winner.state);
        assert_eq!(check.etag, winner.etag);
    }

    #[tokio::test]
    async fn record_created_concurrently_is_a_conflict() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        fixture.broker.set_latency(Duration::from_millis(10));

        let mut a = GrainState::new("Counter", json!({"count": 1}));
        let mut b = GrainState::new("Counter", json!({"count": 2}));
        let (ra, rb) = tokio::join!(
            storage.write_state("g1", &mut a),
            storage.write_state("g1", &mut b)
        );
        assert!(ra.is_ok() ^ rb.is_ok(), "exactly one creator wins");
    }

    #[tokio::test]
    async fn missing_etag_against_existing_state_is_rejected() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let mut first = GrainState::new("Counter", json!({"count": 1}));
        storage.write_state("g1", &mut first).await.unwrap();

        let mut blind = GrainState::new("Counter", json!({"count": 9}));
        assert!(matches!(
            storage.write_state("g1", &mut blind).await,
            Err(StorageError::InconsistentState { current: None, .. })
        ));
        assert!(blind.etag.is_none());
    }

    #[tokio::test]
    async fn stale_etag_is_tolerated_when_configured() {
        let fixture = Fixture::new();
        let storage = fixture
            .started(options().with_fail_on_inconsistent_etag(false))
            .await;
        let mut first = GrainState::new("Counter", json!({"count": 1}));
        storage.write_state("g1", &mut first).await.unwrap();

        let mut blind = GrainState::new("Counter", json!({"count": 9}));
        storage.write_state("g1", &mut blind).await.unwrap();
        assert_eq!(blind.etag, Some(compute_etag(&json!({"count": 9}))));

        let mut check = GrainState::new("Counter", json!({}));
        storage.read_state("g1", &mut check).await.unwrap();
        assert_eq!(check.state, json!({"count": 9}));
    }

    #[tokio::test]
    async fn logically_equal_state_keeps_its_etag() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let mut state = GrainState::new(
            "Event",
            json!({"at": "2024-03-01T12:00:00+02:00", "note": null}),
        );
        storage.write_state("g1", &mut state).await.unwrap();

        // An equivalent rendering still matches the stored tag.
        state.state = json!({"at": "2024-03-01T10:00:00Z"});
        let expected = state.etag.clone();
        storage.write_state("g1", &mut state).await.unwrap();
        assert_eq!(state.etag, expected);
    }

    #[tokio::test]
    async fn clear_removes_state_and_etag() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let mut state = GrainState::new("Counter", json!({"count": 1}));
        storage.write_state("g1", &mut state).await.unwrap();
        assert_eq!(fixture.broker.value_count(), 1);

        storage.clear_state("g1", &mut state).await.unwrap();
        assert!(state.etag.is_none());
        assert_eq!(fixture.broker.value_count(), 0);

        // A cleared record accepts a write without an etag.
        let mut fresh = GrainState::new("Counter", json!({"count": 5}));
        storage.write_state("g1", &mut fresh).await.unwrap();

        // Clearing a missing record is not an error.
        storage.clear_state("g1", &mut fresh).await.unwrap();
        storage.clear_state("g1", &mut fresh).await.unwrap();
    }

    #[tokio::test]
    async fn read_degrades_when_server_is_unreachable() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let mut state = GrainState::new("Counter", json!({"count": 1}));
        storage.write_state("g1", &mut state).await.unwrap();
        let before = state.clone();

        fixture.broker.set_offline(true);
        storage.read_state("g1", &mut state).await.unwrap();
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn write_and_clear_propagate_transport_errors() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        fixture.broker.set_offline(true);

        let mut state = GrainState::new("Counter", json!({"count": 1}));
        let err = storage.write_state("g1", &mut state).await.unwrap_err();
        assert!(matches!(err, StorageError::Transport { operation: "write", .. }));
        assert!(state.etag.is_none());

        state.etag = Some("KEEP".into());
        let err = storage.clear_state("g1", &mut state).await.unwrap_err();
        assert!(matches!(err, StorageError::Transport { operation: "clear", .. }));
        assert_eq!(state.etag.as_deref(), Some("KEEP"));
    }

    #[tokio::test]
    async fn corrupt_record_degrades_read_and_fails_write() {
        let fixture = Fixture::new();
        let storage = fixture.started(options()).await;
        let connection = fixture
            .cache
            .acquire(&options().redis.to_config_string())
            .await
            .unwrap();
        connection
            .set("urn:counter:grains:svc:g1", Bytes::from_static(b"not json"))
            .await
            .unwrap();

        let mut state = GrainState::new("Counter", json!({"count": 0}));
        storage.read_state("g1", &mut state).await.unwrap();
        assert_eq!(state.state, json!({"count": 0}));

        assert!(matches!(
            storage.write_state("g1", &mut state).await,
            Err(StorageError::Serialization(_))
        ));
    }
}
