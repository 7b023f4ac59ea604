use redstream_transport::RedisOptions;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

fn default_fail_on_inconsistent_etag() -> bool {
    true
}

/// Which deployment identity scopes stored state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceLifetime {
    /// State survives redeployments of the service.
    #[default]
    Service,
    /// State belongs to a single cluster deployment.
    Cluster,
}

/// Configuration for [`RedisGrainStorage`](crate::RedisGrainStorage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    #[serde(flatten)]
    pub redis: RedisOptions,

    #[serde(default)]
    pub persistence_lifetime: PersistenceLifetime,

    /// Reject writes whose ETag does not match the stored state. When
    /// `false` the mismatch is only logged.
    #[serde(default = "default_fail_on_inconsistent_etag")]
    pub fail_on_inconsistent_etag: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            redis: RedisOptions::default(),
            persistence_lifetime: PersistenceLifetime::default(),
            fail_on_inconsistent_etag: default_fail_on_inconsistent_etag(),
        }
    }
}

impl StorageOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            redis: RedisOptions::new(connection_string),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_persistence_lifetime(mut self, lifetime: PersistenceLifetime) -> Self {
        self.persistence_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn with_fail_on_inconsistent_etag(mut self, fail: bool) -> Self {
        self.fail_on_inconsistent_etag = fail;
        self
    }

    pub fn validate(&self, provider: &str) -> Result<(), StorageError> {
        self.redis
            .validate(provider)
            .map_err(|e| StorageError::Configuration(e.to_string()))
    }
}
